use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docgenie_core::config::ChangeCaptureConfig;
use docgenie_core::domain::connector::{ConnectorDescriptor, SourceDescriptor};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::capture::{
    CaptureRegistrar, CaptureRegistration, ChangeCaptureHandle, ChangeCaptureTrigger, ChangeEvent,
    ChangeEventBus, ChangeHandler, TriggerSettings,
};
use crate::connectors::{build_connector, ConnectorError, SourceConnector};
use crate::pipeline::{IngestionPipeline, PipelineError};

/// Collaborators needed to start change monitors. Absent when change capture
/// is disabled; relational connectors then start without a trigger.
pub struct CaptureRuntime {
    pub registrar: Arc<dyn CaptureRegistrar>,
    pub bus: Arc<dyn ChangeEventBus>,
    pub consumer_group: String,
    pub poll_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl CaptureRuntime {
    pub fn new(
        registrar: Arc<dyn CaptureRegistrar>,
        bus: Arc<dyn ChangeEventBus>,
        config: &ChangeCaptureConfig,
    ) -> Self {
        Self {
            registrar,
            bus,
            consumer_group: config.consumer_group.clone(),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }

    fn settings(&self, topic_prefix: &str) -> TriggerSettings {
        TriggerSettings {
            poll_timeout: self.poll_timeout,
            shutdown_timeout: self.shutdown_timeout,
            ..TriggerSettings::new(self.consumer_group.clone(), topic_prefix)
        }
    }
}

struct ManagedConnector {
    connector: Arc<dyn SourceConnector>,
    active: bool,
    trigger: Option<ChangeCaptureHandle>,
}

/// Registry of live connectors keyed by name.
pub struct ConnectorManager {
    connectors: RwLock<BTreeMap<String, ManagedConnector>>,
    pipeline: Arc<IngestionPipeline>,
    capture: Option<CaptureRuntime>,
}

impl ConnectorManager {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self { connectors: RwLock::new(BTreeMap::new()), pipeline, capture: None }
    }

    pub fn with_capture(mut self, capture: CaptureRuntime) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    /// Builds a connector per descriptor. A descriptor with an unknown type
    /// is skipped and reported without affecting the others.
    pub async fn load(
        &self,
        descriptors: impl IntoIterator<Item = ConnectorDescriptor>,
    ) -> Vec<(String, ConnectorError)> {
        let mut rejected = Vec::new();
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            if let Err(error) = self.add(descriptor).await {
                warn!(
                    event_name = "connector.registration_rejected",
                    connector = %name,
                    error = %error,
                    "connector registration rejected"
                );
                rejected.push((name, error));
            }
        }
        rejected
    }

    /// Registers a connector, replacing and shutting down any previous
    /// instance with the same name. The new connector starts inactive.
    pub async fn add(&self, descriptor: ConnectorDescriptor) -> Result<(), ConnectorError> {
        let connector = build_connector(&descriptor)?;
        self.register(connector).await;
        Ok(())
    }

    /// Same as `add` for an already-built connector.
    pub async fn register(&self, connector: Arc<dyn SourceConnector>) {
        let name = connector.name().to_owned();
        let previous = self
            .connectors
            .write()
            .await
            .insert(name.clone(), ManagedConnector { connector, active: false, trigger: None });

        if let Some(previous) = previous {
            info!(
                event_name = "connector.replaced",
                connector = %name,
                "connector re-registered, stopping previous instance"
            );
            stop(&name, previous.connector.as_ref(), previous.trigger).await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.read().await.get(name).map(|managed| Arc::clone(&managed.connector))
    }

    pub async fn list(&self) -> Vec<String> {
        self.connectors.read().await.keys().cloned().collect()
    }

    /// `Some(active)` for a registered connector, `None` otherwise.
    pub async fn status(&self, name: &str) -> Option<bool> {
        self.connectors.read().await.get(name).map(|managed| managed.active)
    }

    /// `(registered, active)` connector counts.
    pub async fn counts(&self) -> (usize, usize) {
        let connectors = self.connectors.read().await;
        (connectors.len(), connectors.values().filter(|managed| managed.active).count())
    }

    /// Starts a registered connector. Starting an active connector is a no-op.
    pub async fn startup(&self, name: &str) -> Result<(), ConnectorError> {
        let connector = {
            let connectors = self.connectors.read().await;
            let managed = connectors
                .get(name)
                .ok_or_else(|| ConnectorError::NotRegistered(name.to_owned()))?;
            if managed.active {
                debug!(
                    event_name = "connector.already_active",
                    connector = %name,
                    "connector already active, startup skipped"
                );
                return Ok(());
            }
            Arc::clone(&managed.connector)
        };

        info!(event_name = "connector.starting", connector = %name, "connector starting up");
        let registration = connector.startup().await?;
        let trigger = match (registration, &self.capture) {
            (Some(registration), Some(capture)) => {
                match self.start_trigger(&connector, registration, capture).await {
                    Ok(trigger) => Some(trigger),
                    Err(error) => {
                        if let Err(shutdown_error) = connector.shutdown().await {
                            warn!(
                                event_name = "connector.shutdown_failed",
                                connector = %name,
                                error = %shutdown_error,
                                "releasing connector after failed capture startup"
                            );
                        }
                        return Err(error);
                    }
                }
            }
            _ => None,
        };

        let mut connectors = self.connectors.write().await;
        match connectors.get_mut(name) {
            Some(managed) if Arc::ptr_eq(&managed.connector, &connector) => {
                managed.active = true;
                managed.trigger = trigger;
            }
            // Replaced while starting; the newer registration wins.
            _ => {
                drop(connectors);
                if let Some(trigger) = trigger {
                    trigger.shutdown().await;
                }
                connector.shutdown().await?;
            }
        }
        Ok(())
    }

    async fn start_trigger(
        &self,
        connector: &Arc<dyn SourceConnector>,
        registration: CaptureRegistration,
        capture: &CaptureRuntime,
    ) -> Result<ChangeCaptureHandle, ConnectorError> {
        let startup_failure = |reason: String| ConnectorError::Startup {
            connector: connector.name().to_owned(),
            reason,
        };
        let topic_prefix = registration
            .topic_prefix()
            .map(str::to_owned)
            .ok_or_else(|| startup_failure("registration has no topic prefix".to_owned()))?;
        capture
            .registrar
            .register(&registration)
            .await
            .map_err(|error| startup_failure(error.to_string()))?;

        let handler = Arc::new(PipelineChangeHandler {
            connector: Arc::clone(connector),
            pipeline: Arc::clone(&self.pipeline),
        });
        Ok(ChangeCaptureTrigger::spawn(
            connector.name(),
            capture.settings(&topic_prefix),
            Arc::clone(&capture.bus),
            handler,
        ))
    }

    /// Starts every registered connector. Failures are logged per connector
    /// and never stop the others; returns how many came up.
    pub async fn startup_all(&self) -> usize {
        let mut started = 0;
        for name in self.list().await {
            match self.startup(&name).await {
                Ok(()) => started += 1,
                Err(error) => error!(
                    event_name = "connector.startup_failed",
                    connector = %name,
                    error = %error,
                    "connector startup failed"
                ),
            }
        }
        started
    }

    /// Shuts down active connectors only, stopping their change monitors first.
    pub async fn shutdown_all(&self) {
        let active: Vec<_> = {
            let mut connectors = self.connectors.write().await;
            connectors
                .iter_mut()
                .filter(|(_, managed)| managed.active)
                .map(|(name, managed)| {
                    managed.active = false;
                    (name.clone(), Arc::clone(&managed.connector), managed.trigger.take())
                })
                .collect()
        };

        for (name, connector, trigger) in active {
            info!(event_name = "connector.shutting_down", connector = %name, "shutting down");
            stop(&name, connector.as_ref(), trigger).await;
        }
    }
}

async fn stop(name: &str, connector: &dyn SourceConnector, trigger: Option<ChangeCaptureHandle>) {
    if let Some(trigger) = trigger {
        trigger.shutdown().await;
    }
    if let Err(error) = connector.shutdown().await {
        warn!(
            event_name = "connector.shutdown_failed",
            connector = %name,
            error = %error,
            "connector shutdown failed"
        );
    }
}

/// Re-runs ingestion for one connector whenever its change monitor fires.
struct PipelineChangeHandler {
    connector: Arc<dyn SourceConnector>,
    pipeline: Arc<IngestionPipeline>,
}

#[async_trait]
impl ChangeHandler for PipelineChangeHandler {
    async fn on_change(&self, event: &ChangeEvent) -> Result<(), PipelineError> {
        let source = SourceDescriptor {
            connector_name: self.connector.name().to_owned(),
            connector_type: self.connector.kind(),
            connector_schema: self.connector.schema_snapshot().await?,
            body: None,
        };
        let report = self.pipeline.run(self.connector.as_ref(), source).await?;
        info!(
            event_name = "capture.ingestion_completed",
            connector = %report.namespace,
            topic = %event.topic,
            upserted = report.upserted,
            correlation_id = %report.run_id,
            "change event ingested"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use docgenie_core::config::AppConfig;
    use docgenie_core::domain::connector::{ConnectorDescriptor, ConnectorKind, SourceDescriptor};
    use docgenie_core::knowledge::InMemoryKnowledgeStore;
    use serde_json::{json, Value};

    use super::{CaptureRuntime, ConnectorManager};
    use crate::capture::{
        CaptureError, CaptureRegistrar, CaptureRegistration, ChangeEventBus, ChangeSubscription,
    };
    use crate::connectors::{ConnectorError, Extracted, FetchRequest, SourceConnector};
    use crate::pipeline::{IngestionPipeline, PipelineSettings};

    fn manager() -> ConnectorManager {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        ConnectorManager::new(Arc::new(IngestionPipeline::new(store, PipelineSettings::default())))
    }

    fn rest(name: &str) -> ConnectorDescriptor {
        ConnectorDescriptor::new(name, "rest", json!({"base_url": "http://localhost:1"}))
    }

    /// Fails in `startup` before any connection attempt: event params are incomplete.
    fn misconfigured_postgres(name: &str) -> ConnectorDescriptor {
        ConnectorDescriptor::new(
            name,
            "postgres",
            json!({"db_name": "x", "user": "u", "password": "p", "host": "127.0.0.1", "port": 1}),
        )
        .with_event_params(json!({"class": "PostgresConnector"}))
    }

    /// Pushes change events: `startup` hands back a capture registration.
    #[derive(Default)]
    struct CapturingConnector {
        startups: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl SourceConnector for CapturingConnector {
        fn name(&self) -> &str {
            "warehouse"
        }

        fn kind(&self) -> ConnectorKind {
            ConnectorKind::Relational
        }

        async fn schema_snapshot(&self) -> Result<String, ConnectorError> {
            Ok("[\"orders\"]".into())
        }

        async fn fetch(&self, _request: &FetchRequest) -> Result<Value, ConnectorError> {
            Ok(Value::Null)
        }

        async fn extract(&self, _source: &SourceDescriptor) -> Result<Extracted, ConnectorError> {
            Ok(Extracted::default())
        }

        async fn startup(&self) -> Result<Option<CaptureRegistration>, ConnectorError> {
            self.startups.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CaptureRegistration {
                name: "warehouse".into(),
                config: BTreeMap::from([("topic.prefix".to_owned(), "wh".to_owned())]),
            }))
        }

        async fn shutdown(&self) -> Result<(), ConnectorError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRegistrar {
        registered: Mutex<Vec<String>>,
        reject: bool,
    }

    #[async_trait]
    impl CaptureRegistrar for RecordingRegistrar {
        async fn register(&self, registration: &CaptureRegistration) -> Result<(), CaptureError> {
            self.registered.lock().expect("lock").push(registration.name.clone());
            if self.reject {
                return Err(CaptureError::Transport("capture service unavailable".into()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct EmptyBus {
        topic_calls: AtomicUsize,
    }

    #[async_trait]
    impl ChangeEventBus for EmptyBus {
        async fn topics(&self) -> Result<Vec<String>, CaptureError> {
            self.topic_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn subscribe(
            &self,
            _group: &str,
            _topics: &[String],
        ) -> Result<Box<dyn ChangeSubscription>, CaptureError> {
            Err(CaptureError::Transport("unused".into()))
        }
    }

    #[tokio::test]
    async fn load_isolates_unknown_connector_types() {
        let manager = manager();
        let ftp = ConnectorDescriptor::new("files", "ftp", json!({}));
        let rejected = manager.load(vec![rest("crm"), ftp, rest("hr")]).await;

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "files");
        assert!(matches!(rejected[0].1, ConnectorError::UnknownConnectorType(_)));
        assert_eq!(manager.list().await, vec!["crm".to_string(), "hr".to_string()]);
    }

    #[tokio::test]
    async fn startup_marks_active_and_status_reports_it() {
        let manager = manager();
        manager.add(rest("crm")).await.expect("add");

        assert_eq!(manager.status("crm").await, Some(false));
        assert_eq!(manager.startup_all().await, 1);
        assert_eq!(manager.status("crm").await, Some(true));
        assert_eq!(manager.status("missing").await, None);
        assert_eq!(manager.counts().await, (1, 1));

        manager.shutdown_all().await;
        assert_eq!(manager.status("crm").await, Some(false));
    }

    #[tokio::test]
    async fn failing_startup_is_isolated_and_leaves_connector_inactive() {
        let manager = manager();
        manager.load(vec![rest("crm"), misconfigured_postgres("warehouse")]).await;

        assert_eq!(manager.startup_all().await, 1);
        assert_eq!(manager.status("crm").await, Some(true));
        assert_eq!(manager.status("warehouse").await, Some(false));
    }

    #[tokio::test]
    async fn re_registration_replaces_the_running_instance() {
        let manager = manager();
        manager.add(rest("crm")).await.expect("add");
        manager.startup("crm").await.expect("startup");
        let first = manager.get("crm").await.expect("registered");

        manager.add(rest("crm")).await.expect("re-add");
        let second = manager.get("crm").await.expect("registered");

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.status("crm").await, Some(false));
        assert_eq!(manager.list().await.len(), 1);
    }

    #[test]
    fn capture_runtime_settings_follow_config() {
        let runtime = CaptureRuntime::new(
            Arc::new(RecordingRegistrar::default()),
            Arc::new(EmptyBus::default()),
            &AppConfig::default().change_capture,
        );

        let settings = runtime.settings("wh");
        assert_eq!(settings.consumer_group, "database-change-monitor");
        assert_eq!(settings.topic_prefix, "wh");
        assert_eq!(settings.poll_timeout, Duration::from_secs(1));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn capture_startup_registers_and_spawns_a_monitor() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let bus = Arc::new(EmptyBus::default());
        let manager = manager().with_capture(CaptureRuntime::new(
            registrar.clone(),
            bus.clone(),
            &AppConfig::default().change_capture,
        ));
        manager.register(Arc::new(CapturingConnector::default())).await;

        manager.startup("warehouse").await.expect("startup");
        assert_eq!(*registrar.registered.lock().expect("lock"), vec!["warehouse".to_string()]);
        assert_eq!(manager.status("warehouse").await, Some(true));

        for _ in 0..100 {
            if bus.topic_calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(bus.topic_calls.load(Ordering::SeqCst), 1);

        manager.shutdown_all().await;
        assert_eq!(manager.status("warehouse").await, Some(false));
    }

    #[tokio::test]
    async fn unknown_name_cannot_be_started() {
        let error = manager().startup("ghost").await.expect_err("not registered");
        assert!(matches!(error, ConnectorError::NotRegistered(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn rejected_capture_registration_releases_the_started_connector() {
        let registrar = Arc::new(RecordingRegistrar { reject: true, ..Default::default() });
        let manager = manager().with_capture(CaptureRuntime::new(
            registrar.clone(),
            Arc::new(EmptyBus::default()),
            &AppConfig::default().change_capture,
        ));
        let connector = Arc::new(CapturingConnector::default());
        manager.register(connector.clone()).await;

        let error = manager.startup("warehouse").await.expect_err("registration rejected");
        assert!(matches!(error, ConnectorError::Startup { .. }));
        assert_eq!(manager.status("warehouse").await, Some(false));
        assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);

        manager.shutdown_all().await;
        assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn starting_an_active_connector_keeps_the_running_monitor() {
        let registrar = Arc::new(RecordingRegistrar::default());
        let manager = manager().with_capture(CaptureRuntime::new(
            registrar.clone(),
            Arc::new(EmptyBus::default()),
            &AppConfig::default().change_capture,
        ));
        let connector = Arc::new(CapturingConnector::default());
        manager.register(connector.clone()).await;

        manager.startup("warehouse").await.expect("first startup");
        manager.startup("warehouse").await.expect("second startup");

        assert_eq!(connector.startups.load(Ordering::SeqCst), 1);
        assert_eq!(registrar.registered.lock().expect("lock").len(), 1);
        assert_eq!(manager.status("warehouse").await, Some(true));

        manager.shutdown_all().await;
        assert_eq!(connector.shutdowns.load(Ordering::SeqCst), 1);
    }
}
