use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::dispatcher::{parse_invocation, DispatchResult};
use crate::error::DispatchError;
use crate::health::HealthChecker;
use crate::response::{ConfigResponse, QuotaResponse, ResetResponse};
use crate::throttler::Throttler;
use crate::validation::RequestValidator;

/// Shared application state
pub type AppState = Arc<Throttler>;

#[derive(Debug, Deserialize, Validate)]
pub struct CommandRequest {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub args: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MessageRequest {
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

/// Run a named command for the caller
pub async fn execute_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CommandRequest>,
) -> Result<Json<DispatchResult>, DispatchError> {
    let caller = state.identity().extract(&headers)?;
    RequestValidator::validate_body(&payload)?;

    let result = state
        .dispatcher()
        .dispatch(&caller.identity, caller.scope.as_deref(), &name, &payload.args)
        .await?;

    Ok(Json(result))
}

/// Parse a chat message and run it if it is a command
pub async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<DispatchResult>, DispatchError> {
    let caller = state.identity().extract(&headers)?;
    RequestValidator::validate_body(&payload)?;

    let (name, args) = parse_invocation(&state.config().command_prefix, &payload.content)
        .ok_or_else(|| {
            DispatchError::ValidationFailed(format!(
                "Message does not start with the command prefix '{}'",
                state.config().command_prefix
            ))
        })?;

    let result = state
        .dispatcher()
        .dispatch(&caller.identity, caller.scope.as_deref(), &name, &args)
        .await?;

    Ok(Json(result))
}

/// Remaining quota for an identity. Does not consume a request.
pub async fn get_rate_limit(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, DispatchError> {
    let identity = RequestValidator::validate_identity(&identity)?;
    let quota = state.rate_limiter().remaining_for(&identity).await;

    Ok(Json(QuotaResponse::new(&identity, quota)))
}

/// Clear an identity's current window
pub async fn delete_rate_limit(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, DispatchError> {
    let identity = RequestValidator::validate_identity(&identity)?;
    let cleared = state.rate_limiter().reset(&identity).await?;

    Ok(Json(ResetResponse { identity, cleared }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let checker = HealthChecker::new(state.store().clone(), state.started());
    Json(checker.check_health(state.queue()).await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.queue().is_closed() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "shutting_down"
            })),
        );
    }

    let store = HealthChecker::new(state.store().clone(), state.started()).check_store().await;
    if store.is_healthy() {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "ready",
            "store": store.backend
        })))
    } else {
        (StatusCode::OK, Json(serde_json::json!({
            "status": "ready",
            "store": store.backend,
            "note": "Store unreachable, admission is failing open"
        })))
    }
}

/// Dispatch counters, globally and per identity
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics();

    Json(serde_json::json!({
        "global": metrics.get_global_metrics().await,
        "identities": metrics.identity_count().await,
        "fail_open": state.rate_limiter().fail_open_count(),
        "queue": state.queue().stats(),
    }))
}

/// Effective limiter and queue settings
pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConfigResponse::current(
        state.config(),
        state.store().backend_name(),
        state.registry().command_names(),
    ))
}
