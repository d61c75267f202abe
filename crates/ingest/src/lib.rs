//! Data-source side of docgenie: source connectors and their registry, the
//! change-capture trigger for relational sources, the extract → normalize →
//! persist ingestion pipeline, and the HTTP knowledge-store client.

pub mod capture;
pub mod connectors;
pub mod knowledge;
pub mod manager;
pub mod pipeline;

pub use capture::{
    CaptureError, CaptureRegistrar, CaptureRegistration, CaptureServiceClient, ChangeCaptureHandle,
    ChangeCaptureTrigger, ChangeEvent, ChangeEventBus, ChangeHandler, KafkaRestBus, TriggerSettings,
};
pub use connectors::{
    build_connector, ConnectorError, Extracted, FetchRequest, RelationalConnector, RestConnector,
    SourceConnector, SourcedContent,
};
pub use knowledge::{build_knowledge_store, HttpKnowledgeStore};
pub use manager::{CaptureRuntime, ConnectorManager};
pub use pipeline::{IngestionPipeline, IngestionReport, PipelineError, PipelineSettings};
