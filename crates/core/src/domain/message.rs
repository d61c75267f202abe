use serde::{Deserialize, Serialize};

use crate::routing::Capability;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Which producer wrote a message. Used to pick answers and stage inputs out
/// of the log, never to make routing decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginTag {
    None,
    Context,
    Gen,
    Format,
    Query,
    Upsert,
}

impl OriginTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Context => "context",
            Self::Gen => "gen",
            Self::Format => "format",
            Self::Query => "query",
            Self::Upsert => "upsert",
        }
    }
}

impl From<Capability> for OriginTag {
    fn from(value: Capability) -> Self {
        match value {
            Capability::Context => Self::Context,
            Capability::Gen => Self::Gen,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub origin: OriginTag,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, origin: OriginTag::None, content: content.into() }
    }

    pub fn tagged(origin: OriginTag, content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, origin, content: content.into() }
    }
}

/// Append-only message log for one conversation or ingestion run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(messages: impl IntoIterator<Item = Message>) -> Self {
        Self { messages: messages.into_iter().collect() }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent message written by any of `origins`.
    pub fn last_from(&self, origins: &[OriginTag]) -> Option<&Message> {
        self.messages.iter().rev().find(|message| origins.contains(&message.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationState, Message, OriginTag, Role};

    #[test]
    fn last_from_skips_untagged_and_other_origins() {
        let mut state = ConversationState::seeded([Message::user("what is our refund policy?")]);
        state.push(Message::tagged(OriginTag::Context, "refunds within 30 days"));
        state.push(Message::tagged(OriginTag::Gen, "You can get a refund within 30 days."));
        state.push(Message::user("thanks"));

        let answer = state.last_from(&[OriginTag::Context, OriginTag::Gen]).expect("answer");
        assert_eq!(answer.origin, OriginTag::Gen);
        assert_eq!(answer.role, Role::Assistant);
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn last_from_returns_none_without_tagged_output() {
        let state = ConversationState::seeded([Message::user("q"), Message::user("[]")]);
        assert!(state.last_from(&[OriginTag::Context, OriginTag::Gen]).is_none());
    }
}
