//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for request-level
//! failures, and maps each variant to the appropriate MCP `ErrorData` type for
//! protocol compliance. Per-message gateway failures never reach this type;
//! they become report entries instead.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

use crate::gateway::{GatewayError, GatewayErrorKind};

/// Application error type
///
/// Covers every condition that aborts a whole tool call. Each variant maps to
/// an appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (account, message)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (expired or revoked token, missing scope)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (whole batch exceeded its budget)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Gateway unreachable, throttled, or answering with server errors
    #[error("mail service unavailable: {0}")]
    Unavailable(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Timeout` → `internal_error`
    /// - `Unavailable` → `internal_error`
    /// - `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::AuthFailed(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_failed" })))
            }
            Self::Timeout(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "timeout" })))
            }
            Self::Unavailable(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "unavailable" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Lift a gateway failure that escaped the per-message loop into a request
/// error.
impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let msg = err.message;
        match err.kind {
            GatewayErrorKind::InvalidRequest => Self::InvalidInput(msg),
            GatewayErrorKind::NotFound => Self::NotFound(msg),
            GatewayErrorKind::Unauthorized => Self::AuthFailed(msg),
            GatewayErrorKind::RateLimited | GatewayErrorKind::Unavailable => {
                Self::Unavailable(msg)
            }
            GatewayErrorKind::Malformed | GatewayErrorKind::Rejected => Self::Internal(msg),
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;
    use crate::gateway::{GatewayError, GatewayErrorKind};

    #[test]
    fn unauthorized_gateway_error_becomes_auth_failure() {
        let err = AppError::from(GatewayError::new(
            GatewayErrorKind::Unauthorized,
            Some(401),
            "token expired",
        ));
        assert!(matches!(err, AppError::AuthFailed(ref m) if m == "token expired"));
    }

    #[test]
    fn throttling_maps_to_unavailable_with_code() {
        let err = AppError::from(GatewayError::new(
            GatewayErrorKind::RateLimited,
            Some(429),
            "slow down",
        ));
        let data = err.to_error_data();
        assert_eq!(
            data.data.as_ref().and_then(|d| d["code"].as_str()),
            Some("unavailable")
        );
    }
}
