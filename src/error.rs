use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`CounterStore`](crate::store::CounterStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failure taxonomy of a dispatched command.
///
/// `AdmissionDenied`, `DownstreamThrottled` and `UpstreamUnavailable` are the
/// rate-limit flavoured errors that cross the dispatcher boundary untouched;
/// everything else is folded into a `{ success: false }` outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Rate limit exceeded, window resets at {reset_at}")]
    AdmissionDenied {
        reset_at: DateTime<Utc>,
        retry_after: Duration,
    },

    /// Raised by a handler that sees a collaborator throttling and chooses
    /// not to retry; retried calls surface as `UpstreamUnavailable` instead.
    #[error("{service} is throttling requests")]
    DownstreamThrottled {
        service: String,
        retry_after: Option<Duration>,
    },

    #[error("{service} still throttled after {attempts} attempts")]
    UpstreamUnavailable {
        service: String,
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("{0}")]
    ValidationFailed(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Storage failure: {0}")]
    StorageFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

impl DispatchError {
    /// Stable discriminant used in logs, the usage ledger and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownCommand(_) => "unknown_command",
            DispatchError::AdmissionDenied { .. } => "admission_denied",
            DispatchError::DownstreamThrottled { .. } => "downstream_throttled",
            DispatchError::UpstreamUnavailable { .. } => "upstream_unavailable",
            DispatchError::ValidationFailed(_) => "validation_failed",
            DispatchError::TransferFailed(_) => "transfer_failed",
            DispatchError::StorageFailed(_) => "storage_failed",
            DispatchError::Internal(_) => "internal_error",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            DispatchError::AdmissionDenied { .. }
                | DispatchError::DownstreamThrottled { .. }
                | DispatchError::UpstreamUnavailable { .. }
        )
    }

    /// Whole seconds the caller should wait before trying again, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        let wait = match self {
            DispatchError::AdmissionDenied { retry_after, .. } => Some(*retry_after),
            DispatchError::DownstreamThrottled { retry_after, .. }
            | DispatchError::UpstreamUnavailable { retry_after, .. } => *retry_after,
            _ => None,
        }?;
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        Some(secs.max(1))
    }

    /// Message safe to show the end user. Transfer and internal failures keep
    /// their detail in diagnostics only.
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::ValidationFailed(msg) => msg.clone(),
            DispatchError::UnknownCommand(name) => format!("Unknown command `{}`", name),
            DispatchError::TransferFailed(_) => {
                "Failed to fetch the requested media, please try again later".to_string()
            }
            DispatchError::AdmissionDenied { .. }
            | DispatchError::DownstreamThrottled { .. }
            | DispatchError::UpstreamUnavailable { .. } => format!(
                "You're going too fast, try again in {} seconds",
                self.retry_after_secs().unwrap_or(1)
            ),
            DispatchError::StorageFailed(_) | DispatchError::Internal(_) => {
                "An error occurred while executing that command".to_string()
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::UnknownCommand(_) => StatusCode::NOT_FOUND,
            DispatchError::AdmissionDenied { .. } => StatusCode::TOO_MANY_REQUESTS,
            DispatchError::DownstreamThrottled { .. }
            | DispatchError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::TransferFailed(_) => StatusCode::BAD_GATEWAY,
            DispatchError::StorageFailed(_) | DispatchError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        DispatchError::StorageFailed(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_dispatch_error(err: &DispatchError) -> Self {
        Self::new(err.kind(), &err.user_message(), err.status_code().as_u16())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_dispatch_error(&self);
        let mut resp = (self.status_code(), Json(body)).into_response();

        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        resp
    }
}
