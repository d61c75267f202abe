pub mod relational;
pub mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use docgenie_core::domain::connector::{ConnectorDescriptor, ConnectorKind, SourceDescriptor};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::capture::CaptureRegistration;

pub use relational::RelationalConnector;
pub use rest::RestConnector;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Unknown connector type: {0}")]
    UnknownConnectorType(String),
    #[error("invalid connection params for connector `{connector}`: {reason}")]
    InvalidParams { connector: String, reason: String },
    #[error("Request failed after {attempts} attempts. {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
    #[error("connector `{connector}` does not support {operation}")]
    Unsupported { connector: String, operation: &'static str },
    #[error("connector `{0}` has not been started")]
    NotStarted(String),
    #[error("connector `{0}` is not registered")]
    NotRegistered(String),
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("startup of connector `{connector}` failed: {reason}")]
    Startup { connector: String, reason: String },
}

/// One request against a request/response source. `endpoint` is appended to
/// the connector's base URL as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub method: Method,
    pub endpoint: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl FetchRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self { method, endpoint: endpoint.into(), params: Vec::new(), body: None }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw content pulled from one place inside a source (an endpoint, a table).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourcedContent {
    pub source: String,
    pub items: Vec<Value>,
}

impl SourcedContent {
    /// Arrays become one item per element; anything else is a single item.
    pub fn from_value(source: impl Into<String>, value: Value) -> Self {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Self { source: source.into(), items }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Extracted {
    pub connector: String,
    pub sections: Vec<SourcedContent>,
}

impl Extracted {
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|section| section.items.len()).sum()
    }
}

/// A registered data source. Connectors are built inert; anything that can
/// fail (pools, remote registrations) happens in `startup`.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ConnectorKind;

    async fn schema_snapshot(&self) -> Result<String, ConnectorError>;

    async fn fetch(&self, request: &FetchRequest) -> Result<Value, ConnectorError>;

    async fn execute_query(&self, _query: &str) -> Result<Vec<Value>, ConnectorError> {
        Err(ConnectorError::Unsupported {
            connector: self.name().to_owned(),
            operation: "execute_query",
        })
    }

    async fn extract(&self, source: &SourceDescriptor) -> Result<Extracted, ConnectorError>;

    /// Returns the change-capture registration to install, if this source
    /// pushes change events.
    async fn startup(&self) -> Result<Option<CaptureRegistration>, ConnectorError>;

    async fn shutdown(&self) -> Result<(), ConnectorError>;
}

pub fn build_connector(
    descriptor: &ConnectorDescriptor,
) -> Result<Arc<dyn SourceConnector>, ConnectorError> {
    let kind = descriptor
        .parsed_kind()
        .map_err(|_| ConnectorError::UnknownConnectorType(descriptor.kind.clone()))?;

    Ok(match kind {
        ConnectorKind::Rest => Arc::new(RestConnector::from_descriptor(descriptor)?),
        ConnectorKind::Relational => Arc::new(RelationalConnector::from_descriptor(descriptor)?),
    })
}

pub(crate) fn invalid_params(connector: &str, reason: impl Into<String>) -> ConnectorError {
    ConnectorError::InvalidParams { connector: connector.to_owned(), reason: reason.into() }
}

/// Reads a string param, accepting numbers too since stored params are loosely typed.
pub(crate) fn param_string(params: &Value, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

pub(crate) fn param_u64(params: &Value, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(value) => value.as_u64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use docgenie_core::domain::connector::{ConnectorDescriptor, ConnectorKind};
    use serde_json::json;

    use super::{build_connector, param_u64, ConnectorError, Extracted, SourcedContent};

    #[test]
    fn factory_builds_known_kinds_and_rejects_unknown() {
        let rest = ConnectorDescriptor::new("crm", "rest", json!({"base_url": "http://crm"}));
        let connector = build_connector(&rest).expect("rest connector");
        assert_eq!(connector.name(), "crm");
        assert_eq!(connector.kind(), ConnectorKind::Rest);

        let pg = ConnectorDescriptor::new(
            "warehouse",
            "postgres",
            json!({"db_name": "wh", "user": "u", "password": "p", "host": "db", "port": "5432"}),
        );
        assert_eq!(build_connector(&pg).expect("pg connector").kind(), ConnectorKind::Relational);

        let ftp = ConnectorDescriptor::new("files", "ftp", json!({}));
        let error = build_connector(&ftp).err().expect("unknown type");
        assert!(matches!(error, ConnectorError::UnknownConnectorType(kind) if kind == "ftp"));
    }

    #[test]
    fn sourced_content_flattens_arrays_only() {
        let listed = SourcedContent::from_value("/users", json!([{"id": 1}, {"id": 2}]));
        assert_eq!(listed.items.len(), 2);
        let single = SourcedContent::from_value("/me", json!({"id": 1}));
        assert_eq!(single.items.len(), 1);
        assert!(SourcedContent::from_value("/none", json!(null)).items.is_empty());

        let extracted = Extracted { connector: "crm".into(), sections: vec![listed, single] };
        assert_eq!(extracted.item_count(), 3);
    }

    #[test]
    fn numeric_params_accept_strings() {
        let params = json!({"timeout": "15", "retries": 2, "bad": "x"});
        assert_eq!(param_u64(&params, "timeout"), Some(15));
        assert_eq!(param_u64(&params, "retries"), Some(2));
        assert_eq!(param_u64(&params, "bad"), None);
        assert_eq!(param_u64(&params, "missing"), None);
    }
}
