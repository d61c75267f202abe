use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ensure_success, CaptureError};

/// Connector registration document accepted by the capture service's
/// `POST /connectors` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegistration {
    pub name: String,
    pub config: BTreeMap<String, String>,
}

impl CaptureRegistration {
    pub fn topic_prefix(&self) -> Option<&str> {
        self.config.get("topic.prefix").map(String::as_str)
    }
}

#[async_trait]
pub trait CaptureRegistrar: Send + Sync {
    async fn register(&self, registration: &CaptureRegistration) -> Result<(), CaptureError>;
}

/// Client for the capture service's connector REST API.
pub struct CaptureServiceClient {
    client: reqwest::Client,
    connect_url: String,
}

impl CaptureServiceClient {
    pub fn new(connect_url: &str, timeout: Duration) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, connect_url: connect_url.trim_end_matches('/').to_owned() })
    }

    fn connector_url(&self, name: &str) -> String {
        format!("{}/connectors/{name}", self.connect_url)
    }
}

#[async_trait]
impl CaptureRegistrar for CaptureServiceClient {
    /// Delete-then-create: an existing registration with the same name is
    /// removed first so changed params always take effect.
    async fn register(&self, registration: &CaptureRegistration) -> Result<(), CaptureError> {
        let existing = self.client.get(self.connector_url(&registration.name)).send().await?;
        if existing.status() == StatusCode::OK {
            let deleted = self.client.delete(self.connector_url(&registration.name)).send().await?;
            if deleted.status() != StatusCode::NOT_FOUND {
                ensure_success(deleted).await?;
            }
            info!(
                event_name = "capture.registration_replaced",
                connector = %registration.name,
                "removed existing capture registration"
            );
        }

        let created = self
            .client
            .post(format!("{}/connectors", self.connect_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(registration)
            .send()
            .await?;
        ensure_success(created).await?;

        info!(
            event_name = "capture.registered",
            connector = %registration.name,
            topic_prefix = registration.topic_prefix().unwrap_or(""),
            "capture registration created"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{CaptureRegistrar, CaptureRegistration, CaptureServiceClient};
    use crate::capture::CaptureError;

    fn registration() -> CaptureRegistration {
        CaptureRegistration {
            name: "warehouse".into(),
            config: BTreeMap::from([
                ("connector.class".to_owned(), "PostgresConnector".to_owned()),
                ("topic.prefix".to_owned(), "wh".to_owned()),
            ]),
        }
    }

    fn client(server: &MockServer) -> CaptureServiceClient {
        CaptureServiceClient::new(&server.uri(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn existing_registration_is_deleted_before_create() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/connectors/warehouse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "warehouse"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/connectors/warehouse"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/connectors"))
            .and(body_json(json!({
                "name": "warehouse",
                "config": {"connector.class": "PostgresConnector", "topic.prefix": "wh"}
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).register(&registration()).await.expect("registered");
    }

    #[tokio::test]
    async fn absent_registration_is_created_directly() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/connectors/warehouse"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/connectors"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).register(&registration()).await.expect("registered");
    }

    #[tokio::test]
    async fn rejected_create_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
        Mock::given(method("POST"))
            .and(path("/connectors"))
            .respond_with(ResponseTemplate::new(409).set_body_string("rebalance in progress"))
            .mount(&server)
            .await;

        let error = client(&server).register(&registration()).await.expect_err("conflict");
        assert!(matches!(
            error,
            CaptureError::Status { status: 409, ref body } if body == "rebalance in progress"
        ));
    }
}
