use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use docgenie_db::DbPool;
use docgenie_ingest::ConnectorManager;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    manager: Arc<ConnectorManager>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub connectors: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, manager: Arc<ConnectorManager>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, manager })
}

/// Readiness follows the connector registry database only. Inactive
/// connectors are reported but never degrade the service.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let (registered, active) = state.manager.counts().await;
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "docgenie-server runtime initialized".to_string(),
        },
        database,
        connectors: HealthCheck {
            status: if active == registered { "ready" } else { "partial" },
            detail: format!("{active} of {registered} connectors active"),
        },
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
