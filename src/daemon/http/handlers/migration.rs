//! Migration control handlers.
//!
//! Request/response shapes for the operator surface. Percentages arrive as
//! plain JSON integers and are validated into `[0, 100]` here so malformed
//! input gets a 400 with a reason instead of a bare deserialization error.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use super::super::{AppError, SharedState};
use crate::health::HealthSnapshot;
use crate::migration::MigrationStatus;
use crate::routing::{self, RoutingStats};

/// Migration status plus the transitions currently allowed.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub phase: crate::migration::MigrationPhase,
    pub traffic_percentage: u8,
    pub legacy_enabled: bool,
    pub new_provider_enabled: bool,
    pub can_start: bool,
    pub can_increase: bool,
    pub can_complete: bool,
    pub can_rollback: bool,
}

impl From<MigrationStatus> for StatusResponse {
    fn from(status: MigrationStatus) -> Self {
        Self {
            phase: status.phase,
            traffic_percentage: status.traffic_percentage,
            legacy_enabled: status.legacy_enabled,
            new_provider_enabled: status.new_provider_enabled,
            can_start: status.can_start(),
            can_increase: status.can_increase(),
            can_complete: status.can_complete(),
            can_rollback: status.can_rollback(),
        }
    }
}

/// Outcome of a transition request.
#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub success: bool,
    pub status: StatusResponse,
}

impl From<MigrationStatus> for TransitionResponse {
    fn from(status: MigrationStatus) -> Self {
        Self {
            success: true,
            status: status.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub initial_percentage: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TrafficRequest {
    pub percentage: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RoutingStatsRequest {
    pub caller_keys: Vec<String>,
    /// Percentage to evaluate; defaults to the live effective percentage.
    #[serde(default)]
    pub percentage: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: StatusResponse,
    pub latest: Option<HealthSnapshot>,
    pub breakers: Vec<BreakerState>,
}

#[derive(Debug, Serialize)]
pub struct BreakerState {
    pub destination: String,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub version: &'static str,
}

fn validated_percentage(raw: i64) -> Result<u8, AppError> {
    u8::try_from(raw)
        .ok()
        .filter(|pct| *pct <= 100)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "percentage must be between 0 and 100 (got {raw})"
            ))
        })
}

/// GET /health - daemon liveness.
pub(crate) async fn liveness() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /migration/status - current phase and allowed transitions.
pub(crate) async fn migration_status(
    State(state): State<SharedState>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.state_machine.status().await?;
    Ok(Json(status.into()))
}

/// POST /migration/start - begin migrating at an initial percentage.
pub(crate) async fn migration_start(
    State(state): State<SharedState>,
    Json(req): Json<StartRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let percentage = validated_percentage(req.initial_percentage)?;
    let status = state.state_machine.start(percentage, &req.reason).await?;
    Ok(Json(status.into()))
}

/// PUT /migration/traffic - move the traffic percentage.
pub(crate) async fn migration_traffic(
    State(state): State<SharedState>,
    Json(req): Json<TrafficRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let percentage = validated_percentage(req.percentage)?;
    let status = state
        .state_machine
        .set_traffic_percentage(percentage, &req.reason)
        .await?;
    Ok(Json(status.into()))
}

/// POST /migration/complete - make the new provider authoritative.
pub(crate) async fn migration_complete(
    State(state): State<SharedState>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let status = state.state_machine.complete(&req.reason).await?;
    Ok(Json(status.into()))
}

/// POST /migration/rollback - revert everything to the all-legacy state.
pub(crate) async fn migration_rollback(
    State(state): State<SharedState>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<TransitionResponse>, AppError> {
    let status = state.state_machine.rollback(&req.reason).await?;
    Ok(Json(status.into()))
}

/// GET /migration/health - latest snapshot plus breaker states.
pub(crate) async fn migration_health(
    State(state): State<SharedState>,
) -> Result<Json<HealthResponse>, AppError> {
    let status = state.state_machine.status().await?;
    let breakers = state
        .monitor
        .breaker_states()
        .into_iter()
        .map(|(destination, breaker_state)| BreakerState {
            destination,
            state: breaker_state,
        })
        .collect();
    Ok(Json(HealthResponse {
        status: status.into(),
        latest: state.monitor.latest(),
        breakers,
    }))
}

/// POST /migration/routing-stats - distribution check over caller keys.
pub(crate) async fn migration_routing_stats(
    State(state): State<SharedState>,
    Json(req): Json<RoutingStatsRequest>,
) -> Result<Json<RoutingStats>, AppError> {
    if req.caller_keys.is_empty() {
        return Err(AppError::BadRequest(
            "caller_keys must not be empty".to_string(),
        ));
    }
    let percentage = match req.percentage {
        Some(raw) => validated_percentage(raw)?,
        None => state.state_machine.status().await?.effective_percentage(),
    };
    Ok(Json(routing::statistics(&req.caller_keys, percentage)))
}
