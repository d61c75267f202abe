use std::time::Duration;

use async_trait::async_trait;
use docgenie_core::domain::connector::{ConnectorDescriptor, ConnectorKind, SourceDescriptor};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    invalid_params, param_string, param_u64, ConnectorError, Extracted, FetchRequest,
    SourceConnector, SourcedContent,
};
use crate::capture::CaptureRegistration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

/// HTTP request/response source.
///
/// Connection params: `base_url` (required), `headers` (object), `timeout`
/// (seconds), `retries` (total attempts), `api_key` (sent as a bearer token),
/// `schema` (JSON document describing the API), `endpoints` (paths pulled
/// when an ingestion run names none).
pub struct RestConnector {
    name: String,
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
    api_key: Option<SecretString>,
    retries: u32,
    schema: Option<Value>,
    endpoints: Vec<String>,
}

impl RestConnector {
    pub fn from_descriptor(descriptor: &ConnectorDescriptor) -> Result<Self, ConnectorError> {
        let name = descriptor.name.as_str();
        let params = &descriptor.connection_params;

        let base_url = param_string(params, "base_url")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| invalid_params(name, "`base_url` is required"))?;
        let timeout = param_u64(params, "timeout").unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retries = param_u64(params, "retries")
            .map(|retries| u32::try_from(retries).unwrap_or(u32::MAX))
            .unwrap_or(DEFAULT_RETRIES);

        let mut headers = HeaderMap::new();
        if let Some(Value::Object(map)) = params.get("headers") {
            for (key, value) in map {
                let Some(value) = value.as_str() else {
                    return Err(invalid_params(name, format!("header `{key}` must be a string")));
                };
                let header_name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| invalid_params(name, format!("invalid header name `{key}`")))?;
                let header_value = HeaderValue::from_str(value)
                    .map_err(|_| invalid_params(name, format!("invalid value for `{key}`")))?;
                headers.insert(header_name, header_value);
            }
        }

        let endpoints = match params.get("endpoints") {
            Some(Value::Array(values)) => {
                values.iter().filter_map(Value::as_str).map(str::to_owned).collect()
            }
            _ => Vec::new(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|error| invalid_params(name, format!("http client: {error}")))?;

        Ok(Self {
            name: name.to_owned(),
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            headers,
            api_key: param_string(params, "api_key").map(SecretString::from),
            retries,
            schema: params.get("schema").filter(|schema| !schema.is_null()).cloned(),
            endpoints,
        })
    }

    /// Attempts per request; a configured value of 0 still makes one attempt.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Sends the request up to `attempts()` times with no delay between tries.
    /// Non-2xx responses count as failures.
    pub async fn request(&self, request: &FetchRequest) -> Result<Value, ConnectorError> {
        let attempts = self.attempts();
        let url = format!("{}{}", self.base_url, request.endpoint);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.send_once(&url, request).await {
                Ok(value) => {
                    debug!(
                        event_name = "connector.rest.request_succeeded",
                        connector = %self.name,
                        method = %request.method,
                        endpoint = %request.endpoint,
                        attempt,
                        "rest request succeeded"
                    );
                    return Ok(value);
                }
                Err(error) => {
                    warn!(
                        event_name = "connector.rest.request_failed",
                        connector = %self.name,
                        method = %request.method,
                        endpoint = %request.endpoint,
                        attempt,
                        attempts,
                        error = %error,
                        "rest request attempt failed"
                    );
                    last_error = error;
                }
            }
        }

        Err(ConnectorError::RetryExhausted { attempts, last_error })
    }

    pub async fn get(
        &self,
        endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<Value, ConnectorError> {
        self.request(&FetchRequest::get(endpoint).with_params(params)).await
    }

    pub async fn post(&self, endpoint: &str, body: Option<Value>) -> Result<Value, ConnectorError> {
        self.request(&with_optional_body(FetchRequest::new(Method::POST, endpoint), body)).await
    }

    pub async fn put(&self, endpoint: &str, body: Option<Value>) -> Result<Value, ConnectorError> {
        self.request(&with_optional_body(FetchRequest::new(Method::PUT, endpoint), body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<Value, ConnectorError> {
        self.request(&FetchRequest::new(Method::DELETE, endpoint)).await
    }

    async fn send_once(&self, url: &str, request: &FetchRequest) -> Result<Value, String> {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(self.headers.clone())
            .query(&request.params);
        if let Some(api_key) = &self.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", api_key.expose_secret()));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| error.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{} Error for url: {url}", status.as_u16()));
        }

        let text = response.text().await.map_err(|error| error.to_string())?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|error| format!("response was not JSON: {error}"))
    }
}

fn with_optional_body(request: FetchRequest, body: Option<Value>) -> FetchRequest {
    match body {
        Some(body) => request.with_body(body),
        None => request,
    }
}

/// `{"endpoint": "/path", "params": {...}}` inside a webhook body names what to pull.
fn requested_endpoint(body: &Value) -> Option<FetchRequest> {
    let endpoint = body.get("endpoint")?.as_str()?;
    let params = match body.get("params") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| {
                let value = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                (key.clone(), value)
            })
            .collect(),
        _ => Vec::new(),
    };
    Some(FetchRequest::get(endpoint).with_params(params))
}

#[async_trait]
impl SourceConnector for RestConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Rest
    }

    async fn schema_snapshot(&self) -> Result<String, ConnectorError> {
        Ok(self.schema.as_ref().map(Value::to_string).unwrap_or_default())
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Value, ConnectorError> {
        self.request(request).await
    }

    async fn extract(&self, source: &SourceDescriptor) -> Result<Extracted, ConnectorError> {
        let mut sections = Vec::new();

        if let Some(request) = source.body.as_ref().and_then(requested_endpoint) {
            let value = self.request(&request).await?;
            sections.push(SourcedContent::from_value(request.endpoint, value));
        } else if let Some(body) = source.body.clone().filter(|body| !body.is_null()) {
            sections.push(SourcedContent::from_value("webhook", body));
        } else {
            for endpoint in &self.endpoints {
                let value = self.request(&FetchRequest::get(endpoint.as_str())).await?;
                sections.push(SourcedContent::from_value(endpoint.as_str(), value));
            }
        }

        Ok(Extracted { connector: self.name.clone(), sections })
    }

    async fn startup(&self) -> Result<Option<CaptureRegistration>, ConnectorError> {
        Ok(None)
    }

    async fn shutdown(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}
