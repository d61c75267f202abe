use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use docgenie_core::domain::connector::{ConnectorDescriptor, ConnectorKind, SourceDescriptor};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio::sync::RwLock;
use tracing::info;

use super::{
    invalid_params, param_string, param_u64, ConnectorError, Extracted, FetchRequest,
    SourceConnector, SourcedContent,
};
use crate::capture::CaptureRegistration;

const POOL_MAX_CONNECTIONS: u32 = 4;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLIC_TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = 'public' ORDER BY table_name";

#[derive(Clone, Debug)]
struct PgParams {
    db_name: String,
    user: String,
    password: SecretString,
    host: String,
    port: u16,
}

/// Postgres source. Rows come back as JSON objects; the schema snapshot is the
/// list of tables in the `public` schema.
pub struct RelationalConnector {
    name: String,
    params: PgParams,
    event_params: Option<Value>,
    pool: RwLock<Option<PgPool>>,
}

impl RelationalConnector {
    pub fn from_descriptor(descriptor: &ConnectorDescriptor) -> Result<Self, ConnectorError> {
        let name = descriptor.name.as_str();
        let params = &descriptor.connection_params;
        let required = |key: &str| {
            param_string(params, key)
                .ok_or_else(|| invalid_params(name, format!("`{key}` is required")))
        };

        let port = param_u64(params, "port")
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| invalid_params(name, "`port` must be a valid TCP port"))?;

        Ok(Self {
            name: name.to_owned(),
            params: PgParams {
                db_name: required("db_name")?,
                user: required("user")?,
                password: SecretString::from(required("password")?),
                host: required("host")?,
                port,
            },
            event_params: descriptor.event_params.clone().filter(|value| !value.is_null()),
            pool: RwLock::new(None),
        })
    }

    /// Registration document for the change-capture service, or `None` when
    /// the connector has no event params.
    pub fn capture_registration(&self) -> Result<Option<CaptureRegistration>, ConnectorError> {
        let Some(events) = &self.event_params else {
            return Ok(None);
        };
        let event = |key: &str| {
            param_string(events, key).ok_or_else(|| {
                invalid_params(&self.name, format!("event param `{key}` is required"))
            })
        };

        let config = BTreeMap::from([
            ("connector.class".to_owned(), event("class")?),
            ("database.hostname".to_owned(), self.params.host.clone()),
            ("database.port".to_owned(), self.params.port.to_string()),
            ("database.user".to_owned(), self.params.user.clone()),
            ("database.password".to_owned(), self.params.password.expose_secret().to_owned()),
            ("database.dbname".to_owned(), self.params.db_name.clone()),
            ("topic.prefix".to_owned(), event("topic")?),
            ("table.include.list".to_owned(), event("include_list")?),
            ("plugin.name".to_owned(), event("plugin.name")?),
            ("publication.name".to_owned(), event("publication.name")?),
        ]);

        Ok(Some(CaptureRegistration { name: self.name.clone(), config }))
    }

    async fn pool(&self) -> Result<PgPool, ConnectorError> {
        self.pool.read().await.clone().ok_or_else(|| ConnectorError::NotStarted(self.name.clone()))
    }

    async fn public_tables(&self) -> Result<Vec<String>, ConnectorError> {
        let pool = self.pool().await?;
        Ok(sqlx::query_scalar::<_, String>(PUBLIC_TABLES_SQL).fetch_all(&pool).await?)
    }
}

/// Wraps an arbitrary SELECT so every row is returned as one JSON object.
pub(crate) fn json_rows_sql(query: &str) -> String {
    let query = query.trim().trim_end_matches(';');
    format!("SELECT row_to_json(t) FROM ({query}) t")
}

pub(crate) fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[async_trait]
impl SourceConnector for RelationalConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Relational
    }

    async fn schema_snapshot(&self) -> Result<String, ConnectorError> {
        let tables = self.public_tables().await?;
        Ok(Value::from(tables).to_string())
    }

    async fn fetch(&self, _request: &FetchRequest) -> Result<Value, ConnectorError> {
        Err(ConnectorError::Unsupported { connector: self.name.clone(), operation: "fetch" })
    }

    async fn execute_query(&self, query: &str) -> Result<Vec<Value>, ConnectorError> {
        let pool = self.pool().await?;
        Ok(sqlx::query_scalar::<_, Value>(&json_rows_sql(query)).fetch_all(&pool).await?)
    }

    /// A body may carry `query` (any SELECT) or `table`; otherwise every
    /// public table is read in full.
    async fn extract(&self, source: &SourceDescriptor) -> Result<Extracted, ConnectorError> {
        let body = source.body.as_ref();
        let mut sections = Vec::new();

        if let Some(query) = body.and_then(|body| body.get("query")).and_then(Value::as_str) {
            let rows = self.execute_query(query).await?;
            sections.push(SourcedContent { source: "query".to_owned(), items: rows });
        } else {
            let tables = match body.and_then(|body| body.get("table")).and_then(Value::as_str) {
                Some(table) => vec![table.to_owned()],
                None => self.public_tables().await?,
            };
            for table in tables {
                let select = format!("SELECT * FROM {}", quote_identifier(&table));
                let rows = self.execute_query(&select).await?;
                sections.push(SourcedContent { source: table, items: rows });
            }
        }

        Ok(Extracted { connector: self.name.clone(), sections })
    }

    async fn startup(&self) -> Result<Option<CaptureRegistration>, ConnectorError> {
        let registration = self.capture_registration()?;
        let options = PgConnectOptions::new()
            .host(&self.params.host)
            .port(self.params.port)
            .username(&self.params.user)
            .password(self.params.password.expose_secret())
            .database(&self.params.db_name);
        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|error| ConnectorError::Startup {
                connector: self.name.clone(),
                reason: error.to_string(),
            })?;

        *self.pool.write().await = Some(pool);
        info!(
            event_name = "connector.relational.connected",
            connector = %self.name,
            host = %self.params.host,
            database = %self.params.db_name,
            "relational connector connected"
        );
        Ok(registration)
    }

    async fn shutdown(&self) -> Result<(), ConnectorError> {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }
}
