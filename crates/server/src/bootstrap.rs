use std::sync::Arc;
use std::time::Duration;

use docgenie_agent::{
    ContextCapability, ConversationOrchestrator, GenCapability, HttpLlmClient, LlmClient,
    LlmRouteClassifier,
};
use docgenie_core::audit::{AuditEvent, AuditSink};
use docgenie_core::config::{AppConfig, ConfigError, LoadOptions};
use docgenie_core::knowledge::KnowledgeStoreError;
use docgenie_db::{
    connect_from_config, migrations, ConnectorRepository, DbPool, RepositoryError,
    SqlConnectorRepository,
};
use docgenie_ingest::{
    build_knowledge_store, CaptureError, CaptureRuntime, CaptureServiceClient, ConnectorManager,
    IngestionPipeline, KafkaRestBus, PipelineSettings,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::ApiState;

const CAPTURE_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub connectors: Arc<dyn ConnectorRepository>,
    pub manager: Arc<ConnectorManager>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

impl Application {
    pub fn api_state(&self) -> ApiState {
        ApiState {
            connectors: Arc::clone(&self.connectors),
            manager: Arc::clone(&self.manager),
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("connector registry could not be loaded: {0}")]
    Registry(#[from] RepositoryError),
    #[error("knowledge store setup failed: {0}")]
    KnowledgeStore(#[from] KnowledgeStoreError),
    #[error("change capture setup failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("llm client setup failed: {0}")]
    Llm(String),
}

/// Writes audit events to the log stream.
struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            subject = event.subject.as_deref().unwrap_or("none"),
            actor = %event.actor,
            category = ?event.category,
            outcome = ?event.outcome,
            metadata = ?event.metadata,
            "audit"
        );
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.database_ready",
        correlation_id = "bootstrap",
        "connector registry database connected and migrated"
    );

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let store = build_knowledge_store(&config.knowledge_store)?;
    let pipeline = IngestionPipeline::new(
        Arc::clone(&store),
        PipelineSettings {
            embed_batch_size: config.knowledge_store.embed_batch_size,
            upsert_batch_size: config.knowledge_store.upsert_batch_size,
        },
    )
    .with_audit_sink(Arc::clone(&audit));

    let mut manager = ConnectorManager::new(Arc::new(pipeline));
    if config.change_capture.enabled {
        let registrar =
            CaptureServiceClient::new(&config.change_capture.connect_url, CAPTURE_HTTP_TIMEOUT)?;
        let bus = KafkaRestBus::new(&config.change_capture.bus_url, CAPTURE_HTTP_TIMEOUT)?;
        manager = manager.with_capture(CaptureRuntime::new(
            Arc::new(registrar),
            Arc::new(bus),
            &config.change_capture,
        ));
    }

    let connectors: Arc<dyn ConnectorRepository> =
        Arc::new(SqlConnectorRepository::new(db_pool.clone()));
    let descriptors = connectors.list_all().await?;
    let registered = descriptors.len();
    let rejected = manager.load(descriptors).await;
    if !rejected.is_empty() {
        warn!(
            event_name = "system.bootstrap.connectors_rejected",
            correlation_id = "bootstrap",
            rejected = rejected.len(),
            "some stored connectors could not be registered"
        );
    }
    info!(
        event_name = "system.bootstrap.connectors_loaded",
        correlation_id = "bootstrap",
        loaded = registered - rejected.len(),
        change_capture = config.change_capture.enabled,
        "connector registry loaded"
    );

    let llm: Arc<dyn LlmClient> = Arc::new(
        HttpLlmClient::from_config(&config.llm)
            .map_err(|error| BootstrapError::Llm(format!("{error:#}")))?,
    );
    let orchestrator = ConversationOrchestrator::new(
        Arc::new(LlmRouteClassifier::new(Arc::clone(&llm))),
        Arc::new(ContextCapability::new(
            Arc::clone(&llm),
            Arc::clone(&store),
            config.knowledge_store.search_top_k,
        )),
        Arc::new(GenCapability::new(llm)),
    )
    .with_audit_sink(audit);

    Ok(Application {
        config,
        db_pool,
        connectors,
        manager: Arc::new(manager),
        orchestrator: Arc::new(orchestrator),
    })
}

#[cfg(test)]
mod tests {
    use docgenie_core::config::{ConfigOverrides, KnowledgeProvider, LoadOptions};
    use docgenie_core::domain::connector::ConnectorDescriptor;
    use docgenie_db::{
        connect_with_settings, migrations, ConnectorRepository, SqlConnectorRepository,
    };
    use serde_json::json;

    use crate::bootstrap::bootstrap;

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                knowledge_provider: Some(KnowledgeProvider::Memory),
                change_capture_enabled: Some(false),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_vector_store_credentials_are_missing() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                knowledge_provider: Some(KnowledgeProvider::Pinecone),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("knowledge_store.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_starts_with_an_empty_registry() {
        let app = bootstrap(options("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'connector'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("connector table");
        assert_eq!(table_count, 1);
        assert!(app.manager.list().await.is_empty());

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_registers_stored_connectors_and_skips_unknown_types() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("registry.db").display());

        let pool = connect_with_settings(&url, 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        let repository = SqlConnectorRepository::new(pool.clone());
        let rest = json!({"base_url": "http://localhost:1"});
        repository.save(ConnectorDescriptor::new("crm", "rest", rest)).await.expect("save");
        repository.save(ConnectorDescriptor::new("files", "ftp", json!({}))).await.expect("save");
        pool.close().await;

        let app = bootstrap(options(&url)).await.expect("bootstrap");

        assert_eq!(app.manager.list().await, vec!["crm".to_string()]);
        assert_eq!(app.manager.status("crm").await, Some(false));
        assert_eq!(app.connectors.list_all().await.expect("list").len(), 2);

        app.db_pool.close().await;
    }
}
