use serde::{Deserialize, Serialize};

/// Unit written to the knowledge store. Wire shape is `{"id": "...", "text": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub id: String,
    pub text: String,
}

impl IngestionRecord {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}
