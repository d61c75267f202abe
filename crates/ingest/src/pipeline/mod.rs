//! Three-stage ingestion: extract raw content from a connector, normalize it
//! into `{id, text}` records, then embed and persist them into the namespace
//! named after the connector. Each stage appends one tagged message to the
//! run's conversation and reads only what the previous stage wrote.

mod extract;
mod normalize;
mod persist;

use std::sync::Arc;

use async_trait::async_trait;
use docgenie_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use docgenie_core::domain::connector::SourceDescriptor;
use docgenie_core::domain::message::{ConversationState, Message, OriginTag};
use docgenie_core::knowledge::{
    KnowledgeStore, KnowledgeStoreError, DEFAULT_EMBED_BATCH_SIZE, DEFAULT_UPSERT_BATCH_SIZE,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::connectors::{ConnectorError, SourceConnector};

pub use extract::ExtractStage;
pub use normalize::NormalizeStage;
pub use persist::{PersistStage, PersistSummary};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extract stage failed: {0}")]
    Extract(#[from] ConnectorError),
    #[error("knowledge store failure during {stage}: {error}")]
    Store { stage: &'static str, error: KnowledgeStoreError },
    #[error("{stage} stage expected a `{expected}` message as input")]
    UnexpectedInput { stage: &'static str, expected: &'static str },
    #[error("{stage} stage payload is malformed: {reason}")]
    Payload { stage: &'static str, reason: String },
}

impl PipelineError {
    pub(crate) fn store(stage: &'static str) -> impl FnOnce(KnowledgeStoreError) -> Self {
        move |error| Self::Store { stage, error }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub embed_batch_size: usize,
    pub upsert_batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        }
    }
}

/// What a stage sees: the run's inputs plus shared collaborators.
pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub connector: &'a dyn SourceConnector,
    pub source: &'a SourceDescriptor,
    pub store: &'a dyn KnowledgeStore,
    pub settings: PipelineSettings,
}

impl StageContext<'_> {
    pub fn namespace(&self) -> &str {
        self.source.namespace()
    }
}

#[async_trait]
pub trait IngestionStage: Send + Sync {
    fn origin(&self) -> OriginTag;

    /// Returns the content of the message this stage appends.
    async fn run(
        &self,
        context: &StageContext<'_>,
        conversation: &ConversationState,
    ) -> Result<String, PipelineError>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestionReport {
    pub run_id: String,
    pub namespace: String,
    pub upserted: usize,
    pub conversation: ConversationState,
}

pub struct IngestionPipeline {
    store: Arc<dyn KnowledgeStore>,
    settings: PipelineSettings,
    stages: Vec<Box<dyn IngestionStage>>,
    audit: Arc<dyn AuditSink>,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn KnowledgeStore>, settings: PipelineSettings) -> Self {
        Self {
            store,
            settings,
            stages: vec![Box::new(ExtractStage), Box::new(NormalizeStage), Box::new(PersistStage)],
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Runs every stage in order. A failing stage aborts the run; whatever
    /// earlier stages already wrote stays written.
    pub async fn run(
        &self,
        connector: &dyn SourceConnector,
        source: SourceDescriptor,
    ) -> Result<IngestionReport, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let audit = AuditContext::new(
            Some(source.connector_name.clone()),
            run_id.clone(),
            "ingestion-pipeline",
        );
        let context = StageContext {
            run_id: &run_id,
            connector,
            source: &source,
            store: self.store.as_ref(),
            settings: self.settings,
        };
        let mut conversation = ConversationState::seeded([Message::user(source.to_prompt())]);

        info!(
            event_name = "ingestion.started",
            correlation_id = %run_id,
            connector = %source.connector_name,
            connector_type = %source.connector_type,
            "ingestion run started"
        );

        for stage in &self.stages {
            let stage_name = stage.origin().as_str();
            match stage.run(&context, &conversation).await {
                Ok(content) => {
                    info!(
                        event_name = "ingestion.stage_completed",
                        correlation_id = %run_id,
                        connector = %source.connector_name,
                        stage = stage_name,
                        bytes = content.len(),
                        "ingestion stage completed"
                    );
                    conversation.push(Message::tagged(stage.origin(), content));
                }
                Err(error) => {
                    warn!(
                        event_name = "ingestion.stage_failed",
                        correlation_id = %run_id,
                        connector = %source.connector_name,
                        stage = stage_name,
                        error = %error,
                        "ingestion run aborted"
                    );
                    self.emit(&audit, AuditOutcome::Failed, stage_name, None);
                    return Err(error);
                }
            }
        }

        let upserted = conversation
            .last_from(&[OriginTag::Upsert])
            .and_then(|message| serde_json::from_str::<PersistSummary>(&message.content).ok())
            .map(|summary| summary.upserted)
            .unwrap_or_default();
        self.emit(&audit, AuditOutcome::Success, OriginTag::Upsert.as_str(), Some(upserted));

        Ok(IngestionReport {
            run_id,
            namespace: source.namespace().to_owned(),
            upserted,
            conversation,
        })
    }

    fn emit(
        &self,
        audit: &AuditContext,
        outcome: AuditOutcome,
        stage: &str,
        upserted: Option<usize>,
    ) {
        let event_type = match outcome {
            AuditOutcome::Success => "ingestion.completed",
            _ => "ingestion.failed",
        };
        let mut event = AuditEvent::new(
            audit.subject.clone(),
            audit.correlation_id.clone(),
            event_type,
            AuditCategory::Ingestion,
            audit.actor.clone(),
            outcome,
        )
        .with_metadata("stage", stage);
        if let Some(upserted) = upserted {
            event = event.with_metadata("upserted", upserted.to_string());
        }
        self.audit.emit(event);
    }
}

/// Last message of the conversation, checked against the origin a stage expects.
pub(crate) fn expect_last<'a>(
    conversation: &'a ConversationState,
    stage: &'static str,
    expected: OriginTag,
) -> Result<&'a Message, PipelineError> {
    conversation
        .last()
        .filter(|message| message.origin == expected)
        .ok_or(PipelineError::UnexpectedInput { stage, expected: expected.as_str() })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use docgenie_core::audit::{AuditOutcome, InMemoryAuditSink};
    use docgenie_core::domain::connector::{ConnectorKind, SourceDescriptor};
    use docgenie_core::domain::message::OriginTag;
    use docgenie_core::knowledge::{InMemoryKnowledgeStore, KnowledgeStore};
    use serde_json::{json, Value};

    use super::{IngestionPipeline, PipelineError, PipelineSettings};
    use crate::capture::CaptureRegistration;
    use crate::connectors::{
        ConnectorError, Extracted, FetchRequest, SourceConnector, SourcedContent,
    };

    struct StaticConnector {
        sections: Vec<SourcedContent>,
        fail: bool,
    }

    #[async_trait]
    impl SourceConnector for StaticConnector {
        fn name(&self) -> &str {
            "crm"
        }

        fn kind(&self) -> ConnectorKind {
            ConnectorKind::Rest
        }

        async fn schema_snapshot(&self) -> Result<String, ConnectorError> {
            Ok(String::new())
        }

        async fn fetch(&self, _request: &FetchRequest) -> Result<Value, ConnectorError> {
            Ok(Value::Null)
        }

        async fn extract(&self, _source: &SourceDescriptor) -> Result<Extracted, ConnectorError> {
            if self.fail {
                return Err(ConnectorError::RetryExhausted {
                    attempts: 1,
                    last_error: "503 Error".into(),
                });
            }
            Ok(Extracted { connector: "crm".into(), sections: self.sections.clone() })
        }

        async fn startup(&self) -> Result<Option<CaptureRegistration>, ConnectorError> {
            Ok(None)
        }

        async fn shutdown(&self) -> Result<(), ConnectorError> {
            Ok(())
        }
    }

    fn source() -> SourceDescriptor {
        SourceDescriptor {
            connector_name: "crm".into(),
            connector_type: ConnectorKind::Rest,
            connector_schema: String::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn run_appends_query_format_upsert_in_order() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let pipeline = IngestionPipeline::new(store.clone(), PipelineSettings::default());
        let connector = StaticConnector {
            sections: vec![SourcedContent::from_value(
                "/customers",
                json!([{"name": "Acme", "tier": "gold"}, {"name": "Globex", "tier": "silver"}]),
            )],
            fail: false,
        };

        let report = pipeline.run(&connector, source()).await.expect("run");

        let origins: Vec<OriginTag> =
            report.conversation.messages().iter().map(|message| message.origin).collect();
        assert_eq!(
            origins,
            vec![OriginTag::None, OriginTag::Query, OriginTag::Format, OriginTag::Upsert]
        );
        assert_eq!(report.namespace, "crm");
        assert_eq!(report.upserted, 2);
        assert_eq!(
            store.list_ids("crm", "customers-").await.expect("ids"),
            vec!["customers-0".to_string(), "customers-1".to_string()]
        );
    }

    #[tokio::test]
    async fn extract_failure_aborts_before_any_write() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let sink = InMemoryAuditSink::default();
        let pipeline = IngestionPipeline::new(store.clone(), PipelineSettings::default())
            .with_audit_sink(Arc::new(sink.clone()));
        let connector = StaticConnector { sections: Vec::new(), fail: true };

        let error = pipeline.run(&connector, source()).await.expect_err("should abort");
        assert!(matches!(
            error,
            PipelineError::Extract(ConnectorError::RetryExhausted { attempts: 1, .. })
        ));
        assert!(store.namespaces().await.expect("namespaces").is_empty());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ingestion.failed");
        assert_eq!(events[0].outcome, AuditOutcome::Failed);
        assert_eq!(events[0].metadata.get("stage").map(String::as_str), Some("query"));
    }

    #[tokio::test]
    async fn empty_extract_upserts_nothing() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let pipeline = IngestionPipeline::new(store.clone(), PipelineSettings::default());
        let connector = StaticConnector { sections: Vec::new(), fail: false };

        let report = pipeline.run(&connector, source()).await.expect("run");
        assert_eq!(report.upserted, 0);
        assert_eq!(report.conversation.len(), 4);
    }
}
