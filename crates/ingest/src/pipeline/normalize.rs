use std::collections::BTreeMap;

use async_trait::async_trait;
use docgenie_core::domain::message::{ConversationState, OriginTag};
use docgenie_core::domain::record::IngestionRecord;
use serde_json::Value;

use super::{expect_last, IngestionStage, PipelineError, StageContext};
use crate::connectors::Extracted;

const STAGE: &str = "format";

/// Turns the latest `query` message into `{id, text}` records. Ids are
/// `<source>-<n>`, numbered after the highest `n` already stored under that
/// prefix so repeated runs do not overwrite earlier records.
pub struct NormalizeStage;

#[async_trait]
impl IngestionStage for NormalizeStage {
    fn origin(&self) -> OriginTag {
        OriginTag::Format
    }

    async fn run(
        &self,
        context: &StageContext<'_>,
        conversation: &ConversationState,
    ) -> Result<String, PipelineError> {
        let message = expect_last(conversation, STAGE, OriginTag::Query)?;
        let extracted: Extracted = serde_json::from_str(&message.content)
            .map_err(|error| PipelineError::Payload { stage: STAGE, reason: error.to_string() })?;

        let mut next_index: BTreeMap<String, usize> = BTreeMap::new();
        let mut records = Vec::new();
        for section in extracted.sections {
            let prefix = id_prefix(&section.source);
            if !next_index.contains_key(&prefix) {
                let used = context
                    .store
                    .list_ids(context.namespace(), &format!("{prefix}-"))
                    .await
                    .map_err(PipelineError::store(STAGE))?;
                next_index.insert(prefix.clone(), next_free_index(&prefix, &used));
            }
            let Some(next) = next_index.get_mut(&prefix) else {
                continue;
            };

            for text in section.items.iter().filter_map(item_text) {
                records.push(IngestionRecord::new(format!("{prefix}-{next}"), text));
                *next += 1;
            }
        }

        serde_json::to_string(&records)
            .map_err(|error| PipelineError::Payload { stage: STAGE, reason: error.to_string() })
    }
}

/// Lowercased source with every run of non-alphanumerics collapsed to `-`.
pub(crate) fn id_prefix(source: &str) -> String {
    let mut prefix = String::with_capacity(source.len());
    for ch in source.chars() {
        if ch.is_ascii_alphanumeric() {
            prefix.push(ch.to_ascii_lowercase());
        } else if !prefix.is_empty() && !prefix.ends_with('-') {
            prefix.push('-');
        }
    }
    let prefix = prefix.trim_end_matches('-');
    if prefix.is_empty() {
        "record".to_owned()
    } else {
        prefix.to_owned()
    }
}

pub(crate) fn next_free_index(prefix: &str, used: &[String]) -> usize {
    used.iter()
        .filter_map(|id| id.strip_prefix(prefix)?.strip_prefix('-')?.parse::<usize>().ok())
        .max()
        .map_or(0, |highest| highest + 1)
}

/// One flat fact per item: objects become `key: value` pairs, arrays are
/// joined, nulls and blank strings are dropped.
pub(crate) fn item_text(item: &Value) -> Option<String> {
    let text = match item {
        Value::Null => return None,
        Value::String(text) => text.trim().to_owned(),
        Value::Object(map) => map
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| format!("{key}: {}", scalar_text(value)))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Array(items) => items.iter().filter_map(item_text).collect::<Vec<_>>().join("; "),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use docgenie_core::domain::connector::{ConnectorDescriptor, ConnectorKind, SourceDescriptor};
    use docgenie_core::domain::message::{ConversationState, Message, OriginTag};
    use docgenie_core::domain::record::IngestionRecord;
    use docgenie_core::knowledge::{InMemoryKnowledgeStore, KnowledgeStore, VectorRecord};
    use serde_json::json;

    use super::{id_prefix, item_text, next_free_index, NormalizeStage};
    use crate::connectors::{build_connector, Extracted, SourcedContent};
    use crate::pipeline::{IngestionStage, PipelineError, PipelineSettings, StageContext};

    fn source() -> SourceDescriptor {
        SourceDescriptor {
            connector_name: "crm".into(),
            connector_type: ConnectorKind::Rest,
            connector_schema: String::new(),
            body: None,
        }
    }

    fn query_message(sections: Vec<SourcedContent>) -> Message {
        let extracted = Extracted { connector: "crm".into(), sections };
        Message::tagged(OriginTag::Query, serde_json::to_string(&extracted).expect("json"))
    }

    async fn normalize(
        store: &InMemoryKnowledgeStore,
        conversation: &ConversationState,
    ) -> Result<Vec<IngestionRecord>, PipelineError> {
        let connector = build_connector(&ConnectorDescriptor::new(
            "crm",
            "rest",
            json!({"base_url": "http://localhost:1"}),
        ))
        .expect("connector");
        let source = source();
        let context = StageContext {
            run_id: "run-1",
            connector: connector.as_ref(),
            source: &source,
            store,
            settings: PipelineSettings::default(),
        };
        let content = NormalizeStage.run(&context, conversation).await?;
        Ok(serde_json::from_str(&content).expect("records"))
    }

    #[tokio::test]
    async fn ids_continue_after_highest_stored_suffix() {
        let store = InMemoryKnowledgeStore::new();
        let existing = ["customers-0", "customers-4", "customers-archive-9"].map(|id| {
            VectorRecord { id: id.to_string(), values: vec![0.0; 4], text: String::new() }
        });
        store.upsert("crm", existing.to_vec()).await.expect("seed");

        let conversation = ConversationState::seeded([
            Message::user("seed"),
            query_message(vec![
                SourcedContent::from_value("/customers", json!([{"name": "Acme"}, null])),
                SourcedContent::from_value("/customers", json!("Globex")),
                SourcedContent::from_value("/orders", json!([{"total": 12}])),
            ]),
        ]);

        let records = normalize(&store, &conversation).await.expect("records");
        assert_eq!(
            records,
            vec![
                IngestionRecord::new("customers-5", "name: Acme"),
                IngestionRecord::new("customers-6", "Globex"),
                IngestionRecord::new("orders-0", "total: 12"),
            ]
        );
    }

    #[tokio::test]
    async fn only_the_latest_message_is_read() {
        let store = InMemoryKnowledgeStore::new();
        let conversation = ConversationState::seeded([
            query_message(vec![SourcedContent::from_value("/stale", json!(["old"]))]),
            Message::user("unrelated"),
        ]);

        let error = normalize(&store, &conversation).await.expect_err("wrong input");
        assert!(matches!(
            error,
            PipelineError::UnexpectedInput { stage: "format", expected: "query" }
        ));
    }

    #[test]
    fn prefix_is_slugged_from_source() {
        assert_eq!(id_prefix("/customers"), "customers");
        assert_eq!(id_prefix("/api/v1/Users/"), "api-v1-users");
        assert_eq!(id_prefix("orders"), "orders");
        assert_eq!(id_prefix("///"), "record");
    }

    #[test]
    fn free_index_ignores_foreign_suffixes() {
        let used = vec!["a-1".to_string(), "a-x".to_string(), "ab-7".to_string()];
        assert_eq!(next_free_index("a", &used), 2);
        assert_eq!(next_free_index("b", &used), 0);
    }

    #[test]
    fn item_text_flattens_structures() {
        assert_eq!(
            item_text(&json!({"name": "Acme", "seats": 40, "notes": null})).as_deref(),
            Some("name: Acme, seats: 40")
        );
        assert_eq!(item_text(&json!(["a", {"k": true}])).as_deref(), Some("a; k: true"));
        assert_eq!(item_text(&json!("   ")), None);
        assert_eq!(item_text(&json!(null)), None);
    }
}
