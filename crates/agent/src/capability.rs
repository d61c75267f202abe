use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use docgenie_core::domain::message::{ConversationState, OriginTag, Role};
use docgenie_core::knowledge::{KnowledgeStore, SearchHit};
use docgenie_core::routing::Capability;
use tracing::debug;

use crate::guardrails::PermissionScope;
use crate::llm::LlmClient;

/// One answering unit. Reads the whole conversation and returns a single text
/// result; the caller appends it tagged with `capability()`.
#[async_trait]
pub trait AnswerCapability: Send + Sync {
    fn capability(&self) -> Capability;

    async fn answer(
        &self,
        conversation: &ConversationState,
        scope: &PermissionScope,
    ) -> Result<String>;
}

pub const CONTEXT_PROMPT: &str = "You answer questions using only the knowledge-base passages \
provided. Quote the relevant facts and say which source they came from. If the passages do not \
cover the question, say that nothing relevant was found.";

pub const GEN_PROMPT: &str = "You write the final answer for the user. Use the facts gathered \
earlier in the conversation, keep it short and direct, and do not invent facts that were not \
mentioned.";

/// Retrieval-grounded capability. Searches every namespace that is both
/// granted by the permission scope and present in the knowledge store.
pub struct ContextCapability {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn KnowledgeStore>,
    top_k: usize,
}

impl ContextCapability {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn KnowledgeStore>, top_k: usize) -> Self {
        Self { llm, store, top_k: top_k.max(1) }
    }

    async fn retrieve(
        &self,
        query: &str,
        scope: &PermissionScope,
    ) -> Result<Vec<(String, SearchHit)>> {
        let available: BTreeSet<String> = self.store.namespaces().await?.into_iter().collect();
        let searchable: Vec<&str> =
            scope.namespaces().filter(|namespace| available.contains(*namespace)).collect();
        if searchable.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.store.embed_query(query).await?;
        let mut passages = Vec::new();
        for namespace in searchable {
            let hits = self.store.search(namespace, &embedding, self.top_k).await?;
            debug!(
                event_name = "capability.context.search",
                namespace,
                hits = hits.len(),
                "knowledge store searched"
            );
            passages.extend(hits.into_iter().map(|hit| (namespace.to_string(), hit)));
        }
        Ok(passages)
    }
}

#[async_trait]
impl AnswerCapability for ContextCapability {
    fn capability(&self) -> Capability {
        Capability::Context
    }

    async fn answer(
        &self,
        conversation: &ConversationState,
        scope: &PermissionScope,
    ) -> Result<String> {
        let query = user_query(conversation).unwrap_or_default();
        let passages = self.retrieve(query, scope).await?;

        let mut prompt = String::from("Knowledge-base passages:\n");
        if passages.is_empty() {
            prompt.push_str("(none found)\n");
        }
        for (namespace, hit) in &passages {
            prompt.push_str(&format!("- [{namespace}/{}] {}\n", hit.id, hit.text));
        }
        prompt.push_str("\nConversation:\n");
        prompt.push_str(&render_transcript(conversation));

        self.llm.complete(CONTEXT_PROMPT, &prompt).await
    }
}

/// Non-grounded capability; answers from the conversation alone.
pub struct GenCapability {
    llm: Arc<dyn LlmClient>,
}

impl GenCapability {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AnswerCapability for GenCapability {
    fn capability(&self) -> Capability {
        Capability::Gen
    }

    async fn answer(
        &self,
        conversation: &ConversationState,
        _scope: &PermissionScope,
    ) -> Result<String> {
        self.llm.complete(GEN_PROMPT, &render_transcript(conversation)).await
    }
}

fn user_query(conversation: &ConversationState) -> Option<&str> {
    conversation
        .messages()
        .iter()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
}

pub(crate) fn render_transcript(conversation: &ConversationState) -> String {
    conversation
        .messages()
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            match message.origin {
                OriginTag::None => format!("{role}: {}", message.content),
                origin => format!("{role} ({}): {}", origin.as_str(), message.content),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use docgenie_core::domain::message::{ConversationState, Message, OriginTag};
    use docgenie_core::knowledge::{InMemoryKnowledgeStore, KnowledgeStore, VectorRecord};
    use docgenie_core::routing::Capability;

    use super::{render_transcript, AnswerCapability, ContextCapability, GenCapability};
    use crate::guardrails::PermissionScope;
    use crate::llm::LlmClient;

    #[derive(Default)]
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok("ok".to_string())
        }
    }

    impl RecordingLlm {
        fn last_prompt(&self) -> String {
            self.prompts.lock().expect("lock").last().cloned().unwrap_or_default()
        }
    }

    async fn store_with(namespace: &str, id: &str, text: &str) -> InMemoryKnowledgeStore {
        let store = InMemoryKnowledgeStore::new();
        store
            .upsert(
                namespace,
                vec![VectorRecord {
                    id: id.to_string(),
                    values: InMemoryKnowledgeStore::embed_text(text),
                    text: text.to_string(),
                }],
            )
            .await
            .expect("upsert");
        store
    }

    #[tokio::test]
    async fn context_searches_only_permitted_namespaces() {
        let store = store_with("hr", "hr-0", "vacation allowance is twenty days").await;
        store
            .upsert(
                "finance",
                vec![VectorRecord {
                    id: "fin-0".to_string(),
                    values: InMemoryKnowledgeStore::embed_text("vacation payout rules"),
                    text: "vacation payout rules".to_string(),
                }],
            )
            .await
            .expect("upsert");
        let llm = Arc::new(RecordingLlm::default());
        let capability = ContextCapability::new(llm.clone(), Arc::new(store), 5);

        let conversation = ConversationState::seeded([
            Message::user("how many vacation days?"),
            Message::user(r#"["hr","legal"]"#),
        ]);
        let answer = capability
            .answer(&conversation, &PermissionScope::new(["hr", "legal"]))
            .await
            .expect("answer");

        assert_eq!(answer, "ok");
        assert_eq!(capability.capability(), Capability::Context);
        let prompt = llm.last_prompt();
        assert!(prompt.contains("[hr/hr-0] vacation allowance is twenty days"));
        assert!(!prompt.contains("fin-0"));
    }

    #[tokio::test]
    async fn context_without_searchable_namespace_reports_no_passages() {
        let llm = Arc::new(RecordingLlm::default());
        let capability =
            ContextCapability::new(llm.clone(), Arc::new(InMemoryKnowledgeStore::new()), 5);
        let conversation = ConversationState::seeded([Message::user("anything?")]);

        capability.answer(&conversation, &PermissionScope::new(["hr"])).await.expect("answer");
        assert!(llm.last_prompt().contains("(none found)"));
    }

    #[tokio::test]
    async fn gen_sees_tagged_transcript() {
        let llm = Arc::new(RecordingLlm::default());
        let capability = GenCapability::new(llm.clone());
        let mut conversation = ConversationState::seeded([Message::user("q")]);
        conversation.push(Message::tagged(OriginTag::Context, "fact"));

        capability.answer(&conversation, &PermissionScope::new(["hr"])).await.expect("answer");
        assert_eq!(llm.last_prompt(), render_transcript(&conversation));
        assert!(llm.last_prompt().contains("assistant (context): fact"));
        assert_eq!(capability.capability(), Capability::Gen);
    }
}
