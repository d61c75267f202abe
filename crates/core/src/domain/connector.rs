use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Rest,
    Relational,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Relational => "relational",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rest" | "http" => Ok(Self::Rest),
            "relational" | "postgres" | "postgresql" => Ok(Self::Relational),
            other => Err(DomainError::UnknownConnectorType(other.to_owned())),
        }
    }
}

/// Registered data source. `kind` stays a raw string so a bad registration can
/// be stored and reported without failing the whole registry load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub connection_params: Value,
    #[serde(default)]
    pub event_params: Option<Value>,
    #[serde(default)]
    pub active: bool,
}

impl ConnectorDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, connection_params: Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            connection_params,
            event_params: None,
            active: false,
        }
    }

    pub fn with_event_params(mut self, event_params: Value) -> Self {
        self.event_params = Some(event_params);
        self
    }

    pub fn parsed_kind(&self) -> Result<ConnectorKind, DomainError> {
        self.kind.parse()
    }

    /// Knowledge-store namespace that ingestion for this connector writes into.
    pub fn namespace(&self) -> &str {
        &self.name
    }
}

/// Input to one ingestion run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub connector_name: String,
    pub connector_type: ConnectorKind,
    pub connector_schema: String,
    #[serde(default)]
    pub body: Option<Value>,
}

impl SourceDescriptor {
    pub fn namespace(&self) -> &str {
        &self.connector_name
    }

    /// Text form used as the seed message of an ingestion run.
    pub fn to_prompt(&self) -> String {
        let mut prompt = format!(
            "Connector name: {}. Connector type: {}. Connector schema: {}.",
            self.connector_name, self.connector_type, self.connector_schema
        );
        if let Some(body) = &self.body {
            prompt.push_str(" Request body: ");
            prompt.push_str(&body.to_string());
        }
        prompt
    }
}
