use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use docgenie_core::domain::message::ConversationState;
use docgenie_core::routing::RouteProposal;
use serde::Deserialize;
use tracing::warn;

use crate::capability::render_transcript;
use crate::llm::LlmClient;

/// Proposes the next route for a conversation. Proposals are advisory; the
/// supervisor may substitute or refuse them.
#[async_trait]
pub trait RouteClassifier: Send + Sync {
    async fn classify(&self, conversation: &ConversationState) -> Result<RouteProposal>;
}

pub const SUPERVISOR_PROMPT: &str = "You are a supervisor tasked with managing a conversation \
between the following workers: context, gen. The context worker answers from the company \
knowledge base. The gen worker writes the final answer for the user from everything said so \
far. Given the conversation, respond with the worker to act next. When the answer is complete, \
respond with FINISH. Reply with JSON only, in the form \
{\"next\": \"context\" | \"gen\" | \"FINISH\"}.";

#[derive(Deserialize)]
struct RouterReply {
    next: String,
}

pub struct LlmRouteClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmRouteClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl RouteClassifier for LlmRouteClassifier {
    async fn classify(&self, conversation: &ConversationState) -> Result<RouteProposal> {
        let reply = self.llm.complete(SUPERVISOR_PROMPT, &render_transcript(conversation)).await?;
        Ok(parse_proposal(&reply).unwrap_or_else(|| {
            warn!(
                event_name = "routing.classifier_reply_unparsed",
                reply = %reply,
                "classifier reply was not a route, treating it as FINISH"
            );
            RouteProposal::Finish
        }))
    }
}

/// Accepts `{"next": ...}` anywhere in the reply, or a bare route label.
pub fn parse_proposal(reply: &str) -> Option<RouteProposal> {
    let trimmed = reply.trim();
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(router) = serde_json::from_str::<RouterReply>(&trimmed[start..=end]) {
                return router.next.parse().ok();
            }
        }
    }
    trimmed.trim_matches(|c: char| c == '"' || c == '\'' || c == '.').parse().ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use docgenie_core::domain::message::{ConversationState, Message};
    use docgenie_core::routing::RouteProposal;

    use super::{parse_proposal, LlmRouteClassifier, RouteClassifier, SUPERVISOR_PROMPT};
    use crate::llm::LlmClient;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn complete(&self, system: &str, _prompt: &str) -> Result<String> {
            assert_eq!(system, SUPERVISOR_PROMPT);
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn parses_json_with_surrounding_text() {
        assert_eq!(
            parse_proposal("Sure! {\"next\": \"context\"} is my pick"),
            Some(RouteProposal::Context)
        );
        assert_eq!(parse_proposal("{\"next\":\"FINISH\"}"), Some(RouteProposal::Finish));
        assert_eq!(parse_proposal("gen"), Some(RouteProposal::Gen));
        assert_eq!(parse_proposal("{\"next\": \"search\"}"), None);
        assert_eq!(parse_proposal("no idea"), None);
    }

    #[tokio::test]
    async fn classifier_maps_llm_reply_to_proposal() {
        let classifier = LlmRouteClassifier::new(Arc::new(FixedLlm("{\"next\": \"gen\"}")));
        let conversation = ConversationState::seeded([Message::user("hi")]);
        assert_eq!(classifier.classify(&conversation).await.expect("classify"), RouteProposal::Gen);
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_to_finish() {
        let classifier = LlmRouteClassifier::new(Arc::new(FixedLlm("I think we are done here")));
        let conversation = ConversationState::seeded([Message::user("hi")]);
        assert_eq!(
            classifier.classify(&conversation).await.expect("classify"),
            RouteProposal::Finish
        );
    }
}
