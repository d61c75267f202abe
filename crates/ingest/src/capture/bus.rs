use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::{ensure_success, CaptureError};

const KAFKA_V2_JSON: &str = "application/vnd.kafka.v2+json";
const KAFKA_JSON_V2_JSON: &str = "application/vnd.kafka.json.v2+json";

/// One change record read from the bus. `value` is `None` for tombstones.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChangeEvent {
    pub topic: String,
    #[serde(default)]
    pub key: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
}

#[async_trait]
pub trait ChangeEventBus: Send + Sync {
    async fn topics(&self) -> Result<Vec<String>, CaptureError>;

    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
    ) -> Result<Box<dyn ChangeSubscription>, CaptureError>;
}

#[async_trait]
pub trait ChangeSubscription: Send {
    /// Waits up to `timeout` for new records; an empty batch is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ChangeEvent>, CaptureError>;

    async fn close(&mut self) -> Result<(), CaptureError>;
}

/// Message bus reached through a Kafka REST proxy (v2 API). Each subscription
/// is its own consumer instance, reading from the latest offset.
#[derive(Clone)]
pub struct KafkaRestBus {
    client: reqwest::Client,
    base_url: String,
}

impl KafkaRestBus {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
    }
}

#[derive(Deserialize)]
struct ConsumerInstance {
    base_uri: String,
}

#[async_trait]
impl ChangeEventBus for KafkaRestBus {
    async fn topics(&self) -> Result<Vec<String>, CaptureError> {
        let response = self
            .client
            .get(format!("{}/topics", self.base_url))
            .header(ACCEPT, KAFKA_V2_JSON)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
    ) -> Result<Box<dyn ChangeSubscription>, CaptureError> {
        let instance_name = format!("docgenie-{}", Uuid::new_v4());
        let response = self
            .client
            .post(format!("{}/consumers/{group}", self.base_url))
            .header(CONTENT_TYPE, KAFKA_V2_JSON)
            .json(&json!({
                "name": instance_name,
                "format": "json",
                "auto.offset.reset": "latest",
                "auto.commit.enable": "true",
            }))
            .send()
            .await?;
        let instance: ConsumerInstance = ensure_success(response).await?.json().await?;
        let base_uri = instance.base_uri.trim_end_matches('/').to_owned();

        let mut subscription = KafkaRestSubscription {
            client: self.client.clone(),
            base_uri,
            closed: false,
        };
        let subscribed = self
            .client
            .post(format!("{}/subscription", subscription.base_uri))
            .header(CONTENT_TYPE, KAFKA_V2_JSON)
            .json(&json!({ "topics": topics }))
            .send()
            .await;
        match subscribed {
            Ok(response) => {
                if let Err(error) = ensure_success(response).await {
                    subscription.close().await.ok();
                    return Err(error);
                }
            }
            Err(error) => {
                subscription.close().await.ok();
                return Err(error.into());
            }
        }

        debug!(
            event_name = "capture.bus.subscribed",
            group,
            topics = topics.len(),
            consumer = %subscription.base_uri,
            "subscribed consumer instance"
        );
        Ok(Box::new(subscription))
    }
}

struct KafkaRestSubscription {
    client: reqwest::Client,
    base_uri: String,
    closed: bool,
}

#[async_trait]
impl ChangeSubscription for KafkaRestSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ChangeEvent>, CaptureError> {
        let response = self
            .client
            .get(format!("{}/records", self.base_uri))
            .query(&[("timeout", timeout.as_millis().to_string())])
            .header(ACCEPT, KAFKA_JSON_V2_JSON)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let response = self
            .client
            .delete(&self.base_uri)
            .header(CONTENT_TYPE, KAFKA_V2_JSON)
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{ChangeEventBus, KafkaRestBus};

    #[tokio::test]
    async fn subscribe_poll_and_close_follow_consumer_lifecycle() {
        let server = MockServer::start().await;
        let base_uri = format!("{}/consumers/monitor/instances/one", server.uri());

        Mock::given(method("GET"))
            .and(path("/topics"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!(["wh.public.orders", "_schemas"])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/consumers/monitor"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"instance_id": "one", "base_uri": base_uri})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/consumers/monitor/instances/one/subscription"))
            .and(body_json(json!({"topics": ["wh.public.orders"]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/consumers/monitor/instances/one/records"))
            .and(query_param("timeout", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"topic": "wh.public.orders", "key": null, "value": {"op": "c"}, "partition": 0},
                {"topic": "wh.public.orders", "key": {"id": 1}, "value": null, "partition": 0}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/consumers/monitor/instances/one"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let bus = KafkaRestBus::new(&server.uri(), Duration::from_secs(5)).expect("bus");
        let topics = bus.topics().await.expect("topics");
        assert_eq!(topics, vec!["wh.public.orders".to_string(), "_schemas".to_string()]);

        let mut subscription =
            bus.subscribe("monitor", &topics[..1]).await.expect("subscription");
        let events = subscription.poll(Duration::from_secs(1)).await.expect("poll");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, Some(json!({"op": "c"})));
        assert_eq!(events[1].value, None);

        subscription.close().await.expect("close");
        subscription.close().await.expect("second close is a no-op");
    }

    #[tokio::test]
    async fn failed_subscription_cleans_up_consumer_instance() {
        let server = MockServer::start().await;
        let base_uri = format!("{}/consumers/monitor/instances/two", server.uri());

        Mock::given(method("POST"))
            .and(path("/consumers/monitor"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"instance_id": "two", "base_uri": base_uri})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/consumers/monitor/instances/two/subscription"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/consumers/monitor/instances/two"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let bus = KafkaRestBus::new(&server.uri(), Duration::from_secs(5)).expect("bus");
        let outcome = bus.subscribe("monitor", &["wh.public.orders".to_string()]).await;
        assert!(outcome.is_err());
    }
}
