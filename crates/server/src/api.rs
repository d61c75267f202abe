//! HTTP surface of the docgenie server.
//!
//! - `POST /receive_webhook/{connector_name}` push content from a source into its namespace
//! - `POST /chat/answer`                      answer one question within a permission scope
//! - `GET  /connector/all`                    list registered connectors
//! - `GET  /connector/{name}`                 one registration
//! - `GET  /connector/{name}/status`          whether the live connector is active
//! - `POST /connector/new`                    register, persist and start a connector

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docgenie_agent::{ConversationOrchestrator, PermissionScope};
use docgenie_core::domain::connector::{ConnectorDescriptor, SourceDescriptor};
use docgenie_core::errors::{ApplicationError, DomainError, InterfaceError};
use docgenie_db::{ConnectorRepository, RepositoryError};
use docgenie_ingest::{build_connector, ConnectorError, ConnectorManager};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiState {
    pub connectors: Arc<dyn ConnectorRepository>,
    pub manager: Arc<ConnectorManager>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ChatResponse {
    pub answer: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: &'static str,
    correlation_id: String,
}

/// Maps an interface error onto a status code and a user-safe body.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            detail: self.0.user_message(),
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/receive_webhook/{connector_name}", post(receive_webhook))
        .route("/chat/answer", post(chat_answer))
        .route("/connector/all", get(list_connectors))
        .route("/connector/new", post(create_connector))
        .route("/connector/{name}", get(get_connector))
        .route("/connector/{name}/status", get(connector_status))
        .with_state(state)
}

fn not_found(name: &str, correlation_id: &str) -> ApiError {
    ApplicationError::NotFound(format!("connector `{name}`")).into_interface(correlation_id).into()
}

fn repository_error(error: RepositoryError, correlation_id: &str) -> ApiError {
    error!(
        event_name = "api.repository_failed",
        correlation_id = %correlation_id,
        error = %error,
        "connector registry unavailable"
    );
    ApplicationError::Persistence(error.to_string()).into_interface(correlation_id).into()
}

fn registration_error(error: ConnectorError, correlation_id: &str) -> ApiError {
    warn!(
        event_name = "api.connector_rejected",
        correlation_id = %correlation_id,
        error = %error,
        "connector registration rejected"
    );
    let domain = match error {
        ConnectorError::UnknownConnectorType(kind) => DomainError::UnknownConnectorType(kind),
        other => DomainError::InvariantViolation(other.to_string()),
    };
    ApplicationError::Domain(domain).into_interface(correlation_id).into()
}

/// Runs ingestion for the named connector with the request body attached.
/// Ingestion failures are logged; the caller always gets the same
/// acknowledgement once the connector is known.
async fn receive_webhook(
    State(state): State<ApiState>,
    Path(connector_name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Acknowledgement>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let connector = state
        .manager
        .get(&connector_name)
        .await
        .ok_or_else(|| not_found(&connector_name, &correlation_id))?;

    let connector_schema = connector.schema_snapshot().await.unwrap_or_else(|error| {
        warn!(
            event_name = "api.webhook.schema_unavailable",
            correlation_id = %correlation_id,
            connector = %connector_name,
            error = %error,
            "schema snapshot unavailable, continuing without it"
        );
        String::new()
    });
    let source = SourceDescriptor {
        connector_name: connector.name().to_owned(),
        connector_type: connector.kind(),
        connector_schema,
        body: Some(body),
    };

    match state.manager.pipeline().run(connector.as_ref(), source).await {
        Ok(report) => info!(
            event_name = "api.webhook.ingested",
            correlation_id = %correlation_id,
            connector = %connector_name,
            run_id = %report.run_id,
            upserted = report.upserted,
            "webhook content ingested"
        ),
        Err(error) => error!(
            event_name = "api.webhook.ingestion_failed",
            correlation_id = %correlation_id,
            connector = %connector_name,
            error = %error,
            "webhook ingestion failed"
        ),
    }

    Ok(Json(Acknowledgement { message: "Webhook received" }))
}

async fn chat_answer(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let scope = PermissionScope::new(request.permissions);
    match state.orchestrator.answer(&request.query, &scope).await {
        Ok(answer) => Ok(Json(ChatResponse { answer })),
        Err(error) => {
            let correlation_id = Uuid::new_v4().to_string();
            error!(
                event_name = "api.chat.failed",
                correlation_id = %correlation_id,
                error = %error,
                "conversation failed"
            );
            Err(ApplicationError::Integration(error.to_string())
                .into_interface(correlation_id)
                .into())
        }
    }
}

async fn list_connectors(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ConnectorDescriptor>>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let mut descriptors = state
        .connectors
        .list_all()
        .await
        .map_err(|error| repository_error(error, &correlation_id))?;
    for descriptor in &mut descriptors {
        descriptor.active = state.manager.status(&descriptor.name).await.unwrap_or(false);
    }
    Ok(Json(descriptors))
}

async fn get_connector(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ConnectorDescriptor>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let mut descriptor = state
        .connectors
        .find_by_name(&name)
        .await
        .map_err(|error| repository_error(error, &correlation_id))?
        .ok_or_else(|| not_found(&name, &correlation_id))?;
    descriptor.active = state.manager.status(&name).await.unwrap_or(false);
    Ok(Json(descriptor))
}

async fn connector_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<bool>, ApiError> {
    match state.manager.status(&name).await {
        Some(active) => Ok(Json(active)),
        None => Err(not_found(&name, &Uuid::new_v4().to_string())),
    }
}

/// Validates the registration by building the connector before anything is
/// persisted. A startup failure leaves the connector registered but inactive.
async fn create_connector(
    State(state): State<ApiState>,
    Json(mut descriptor): Json<ConnectorDescriptor>,
) -> Result<Json<ConnectorDescriptor>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    if descriptor.name.trim().is_empty() {
        return Err(ApplicationError::Domain(DomainError::InvariantViolation(
            "connector name must not be empty".to_owned(),
        ))
        .into_interface(correlation_id)
        .into());
    }

    let connector =
        build_connector(&descriptor).map_err(|error| registration_error(error, &correlation_id))?;
    descriptor.active = false;
    state
        .connectors
        .save(descriptor.clone())
        .await
        .map_err(|error| repository_error(error, &correlation_id))?;
    state.manager.register(connector).await;

    if let Err(error) = state.manager.startup(&descriptor.name).await {
        warn!(
            event_name = "api.connector.startup_failed",
            correlation_id = %correlation_id,
            connector = %descriptor.name,
            error = %error,
            "connector registered but failed to start"
        );
    }
    descriptor.active = state.manager.status(&descriptor.name).await.unwrap_or(false);
    info!(
        event_name = "api.connector.created",
        correlation_id = %correlation_id,
        connector = %descriptor.name,
        kind = %descriptor.kind,
        active = descriptor.active,
        "connector registered"
    );
    Ok(Json(descriptor))
}
