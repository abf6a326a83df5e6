//! HTTP operator API.
//!
//! Exposes the migration controller to operators: status, the four
//! lifecycle transitions, health inspection, and routing statistics.
//! Handlers return `Result<Json<_>, AppError>`; guard violations map to
//! 409 with the guard's reason, malformed input to 400, and persistence
//! failures to 500 with migration state untouched.

pub mod handlers;

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde_json::json;
use tracing::error;

use crate::health::HealthMonitor;
use crate::migration::{MigrationStateMachine, TransitionError};

/// Shared state handed to every handler.
pub struct AppState {
    pub state_machine: Arc<MigrationStateMachine>,
    pub monitor: Arc<HealthMonitor>,
}

pub type SharedState = Arc<AppState>;

/// API-level error, mapped onto HTTP status codes.
#[derive(Debug)]
pub enum AppError {
    /// Malformed input (bad percentage, empty key list).
    BadRequest(String),
    /// Transition guard violation; state unchanged.
    Conflict(String),
    /// Store or other internal failure; state unchanged.
    Internal(String),
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidPercentage(_) => AppError::BadRequest(err.to_string()),
            TransitionError::Store(inner) => {
                error!(error = %inner, "flag store failure");
                AppError::Internal("migration flag store unavailable".to_string())
            },
            guard => AppError::Conflict(guard.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the operator API router.
pub fn router(state: SharedState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(handlers::liveness))
        .route("/migration/status", get(handlers::migration_status))
        .route("/migration/start", post(handlers::migration_start))
        .route("/migration/traffic", put(handlers::migration_traffic))
        .route("/migration/complete", post(handlers::migration_complete))
        .route("/migration/rollback", post(handlers::migration_rollback))
        .route("/migration/health", get(handlers::migration_health))
        .route(
            "/migration/routing-stats",
            post(handlers::migration_routing_stats),
        )
        .with_state(state)
}
