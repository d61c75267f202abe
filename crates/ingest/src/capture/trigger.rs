use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CaptureError, ChangeEvent, ChangeEventBus};
use crate::pipeline::PipelineError;

/// Reacts to one change event, typically by re-running ingestion.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, event: &ChangeEvent) -> Result<(), PipelineError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerSettings {
    pub consumer_group: String,
    pub topic_prefix: String,
    pub poll_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl TriggerSettings {
    pub fn new(consumer_group: impl Into<String>, topic_prefix: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            topic_prefix: topic_prefix.into(),
            poll_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic.strip_prefix(self.topic_prefix.as_str()).is_some_and(|rest| rest.starts_with('.'))
    }
}

/// Background change monitor for one connector.
pub struct ChangeCaptureTrigger;

impl ChangeCaptureTrigger {
    pub fn spawn(
        connector: impl Into<String>,
        settings: TriggerSettings,
        bus: Arc<dyn ChangeEventBus>,
        handler: Arc<dyn ChangeHandler>,
    ) -> ChangeCaptureHandle {
        let connector = connector.into();
        let stop = Arc::new(AtomicBool::new(false));
        let shutdown_timeout = settings.shutdown_timeout;

        let task = tokio::spawn({
            let connector = connector.clone();
            let stop = Arc::clone(&stop);
            async move {
                match monitor(&connector, &settings, bus.as_ref(), handler.as_ref(), &stop).await {
                    Ok(handled) => info!(
                        event_name = "capture.trigger.stopped",
                        connector = %connector,
                        handled,
                        "change monitor stopped"
                    ),
                    Err(error) => warn!(
                        event_name = "capture.trigger.failed",
                        connector = %connector,
                        error = %error,
                        "change monitor exited with error"
                    ),
                }
            }
        });

        ChangeCaptureHandle { connector, stop, task, shutdown_timeout }
    }
}

async fn monitor(
    connector: &str,
    settings: &TriggerSettings,
    bus: &dyn ChangeEventBus,
    handler: &dyn ChangeHandler,
    stop: &AtomicBool,
) -> Result<usize, CaptureError> {
    let topics: Vec<String> =
        bus.topics().await?.into_iter().filter(|topic| settings.matches(topic)).collect();
    if topics.is_empty() {
        info!(
            event_name = "capture.trigger.no_topics",
            connector,
            topic_prefix = %settings.topic_prefix,
            "no matching change topics, monitor exiting"
        );
        return Ok(0);
    }

    let mut subscription = bus.subscribe(&settings.consumer_group, &topics).await?;
    info!(
        event_name = "capture.trigger.started",
        connector,
        topics = topics.len(),
        "change monitor subscribed"
    );

    let mut handled = 0;
    while !stop.load(Ordering::SeqCst) {
        let events = match subscription.poll(settings.poll_timeout).await {
            Ok(events) => events,
            Err(error) => {
                debug!(
                    event_name = "capture.trigger.poll_failed",
                    connector,
                    error = %error,
                    "poll failed, skipping"
                );
                tokio::time::sleep(settings.poll_timeout).await;
                continue;
            }
        };

        for event in events.iter().filter(|event| event.value.is_some()) {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match handler.on_change(event).await {
                Ok(()) => handled += 1,
                Err(error) => warn!(
                    event_name = "capture.trigger.ingestion_failed",
                    connector,
                    topic = %event.topic,
                    error = %error,
                    "ingestion after change event failed"
                ),
            }
        }
    }

    if let Err(error) = subscription.close().await {
        debug!(connector, error = %error, "closing change subscription failed");
    }
    Ok(handled)
}

pub struct ChangeCaptureHandle {
    connector: String,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl ChangeCaptureHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Sets the stop flag and waits up to the shutdown timeout. A worker stuck
    /// in a poll is aborted; returns whether it stopped on its own.
    pub async fn shutdown(mut self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        match tokio::time::timeout(self.shutdown_timeout, &mut self.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    event_name = "capture.trigger.shutdown_timeout",
                    connector = %self.connector,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "change monitor did not stop in time"
                );
                self.task.abort();
                false
            }
        }
    }
}
