use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use docgenie_core::domain::connector::ConnectorDescriptor;

use super::{ConnectorRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConnectorRepository {
    pool: DbPool,
}

impl SqlConnectorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConnectorRepository for SqlConnectorRepository {
    async fn list_all(&self) -> Result<Vec<ConnectorDescriptor>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                name,
                kind,
                connection_params,
                event_params
             FROM connector
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(connector_from_row).collect()
    }

    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ConnectorDescriptor>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                name,
                kind,
                connection_params,
                event_params
             FROM connector
             WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(connector_from_row).transpose()
    }

    async fn save(&self, connector: ConnectorDescriptor) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let event_params = connector.event_params.as_ref().map(Value::to_string);

        sqlx::query(
            "INSERT INTO connector (
                name,
                kind,
                connection_params,
                event_params,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                kind = excluded.kind,
                connection_params = excluded.connection_params,
                event_params = excluded.event_params,
                updated_at = excluded.updated_at",
        )
        .bind(&connector.name)
        .bind(&connector.kind)
        .bind(connector.connection_params.to_string())
        .bind(event_params)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn connector_from_row(row: SqliteRow) -> Result<ConnectorDescriptor, RepositoryError> {
    let name: String = row.try_get("name")?;
    let connection_params =
        parse_json(&name, "connection_params", row.try_get("connection_params")?)?;
    let event_params = row
        .try_get::<Option<String>, _>("event_params")?
        .map(|raw| parse_json(&name, "event_params", raw))
        .transpose()?;

    Ok(ConnectorDescriptor {
        kind: row.try_get("kind")?,
        name,
        connection_params,
        event_params,
        active: false,
    })
}

fn parse_json(name: &str, column: &str, raw: String) -> Result<Value, RepositoryError> {
    serde_json::from_str(&raw).map_err(|error| {
        RepositoryError::Decode(format!(
            "invalid JSON in `{column}` for connector `{name}`: {error}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use docgenie_core::domain::connector::ConnectorDescriptor;

    use super::SqlConnectorRepository;
    use crate::repositories::{ConnectorRepository, RepositoryError};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn save_then_find_round_trips_params() {
        let repo = SqlConnectorRepository::new(setup_pool().await);
        let descriptor = ConnectorDescriptor::new(
            "orders",
            "postgres",
            json!({"db_name": "shop", "user": "app", "password": "pw", "host": "db", "port": 5432}),
        )
        .with_event_params(json!({"topic": "shop", "include_list": "public.orders"}));

        repo.save(descriptor.clone()).await.expect("save");
        let loaded = repo.find_by_name("orders").await.expect("find").expect("present");

        assert_eq!(loaded, descriptor);
        assert!(!loaded.active);
    }

    #[tokio::test]
    async fn save_with_same_name_replaces_registration() {
        let repo = SqlConnectorRepository::new(setup_pool().await);
        repo.save(ConnectorDescriptor::new("crm", "rest", json!({"base_url": "http://old"})))
            .await
            .expect("first save");
        repo.save(ConnectorDescriptor::new("crm", "rest", json!({"base_url": "http://new"})))
            .await
            .expect("second save");
        repo.save(ConnectorDescriptor::new("wiki", "rest", json!({})))
            .await
            .expect("third save");

        let all = repo.list_all().await.expect("list");
        let names: Vec<&str> = all.iter().map(|connector| connector.name.as_str()).collect();
        assert_eq!(names, vec!["crm", "wiki"]);
        assert_eq!(all[0].connection_params["base_url"], "http://new");
    }

    #[tokio::test]
    async fn unknown_name_is_none() {
        let repo = SqlConnectorRepository::new(setup_pool().await);
        assert!(repo.find_by_name("missing").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn corrupt_params_surface_as_decode_error() {
        let pool = setup_pool().await;
        sqlx::query(
            "INSERT INTO connector (name, kind, connection_params, created_at, updated_at)
             VALUES ('bad', 'rest', 'not-json', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert");

        let error = SqlConnectorRepository::new(pool).list_all().await.expect_err("decode");
        assert!(matches!(error, RepositoryError::Decode(ref message) if message.contains("bad")));
    }
}
