use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::codec::DecodeError;
use crate::queue::StoreError;

/// Errors that escape a queue operation.
///
/// Per-item failures during a round never surface here; they are classified
/// and counted in the round report instead.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Required storage is missing or misconfigured. Fatal for the call.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The message could not be turned into a storable payload.
    #[error("Encode error: {0}")]
    Encode(#[from] DecodeError),
}

impl QueueError {
    pub fn is_config(&self) -> bool {
        matches!(self, QueueError::Config(_) | QueueError::Settings(_))
    }

    pub fn missing_table(table: &str) -> Self {
        QueueError::Config(format!(
            "\"{}\" not found in database. Make sure the db migration is properly done and the table is created.",
            table
        ))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let (status, code, log_message) = match &self {
            QueueError::Config(_) | QueueError::Settings(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CONFIG_ERROR",
                self.to_string(),
            ),
            QueueError::Store(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_ERROR",
                self.to_string(),
            ),
            QueueError::Encode(_) => (StatusCode::BAD_REQUEST, "ENCODE_ERROR", self.to_string()),
        };

        let client_message = if is_production() && status.is_server_error() {
            "Mail queue unavailable".to_string()
        } else {
            log_message.clone()
        };

        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
