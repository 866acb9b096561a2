//! Credit Check Error Types
//!
//! This module defines all error types that can occur while deciding how many
//! credits a caller has left.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error types for credit checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditError {
    /// No identity could be resolved for the caller
    #[error("Authentication required")]
    Unauthorized,

    /// Request body missing or carrying an invalid tier flag
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Fast quota store unreachable, timed out or faulted
    #[error("Quota store unavailable: {0}")]
    StoreUnavailable(String),

    /// Durable usage ledger query failed
    #[error("Usage ledger query failed: {0}")]
    LedgerQueryFailed(String),
}

impl CreditError {
    /// HTTP status this error maps to when it crosses the service boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            CreditError::Unauthorized => StatusCode::UNAUTHORIZED,
            CreditError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            CreditError::StoreUnavailable(_) | CreditError::LedgerQueryFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CreditError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            CreditError::Unauthorized | CreditError::MalformedRequest(_) => self.to_string(),
            _ => format!("Internal server error: {}", self),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<redis::RedisError> for CreditError {
    fn from(err: redis::RedisError) -> Self {
        CreditError::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::Error> for CreditError {
    fn from(err: sqlx::Error) -> Self {
        CreditError::LedgerQueryFailed(err.to_string())
    }
}
