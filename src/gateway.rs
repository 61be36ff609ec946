//! Remote mailbox gateway contract
//!
//! The batch engine talks to the mail service only through
//! [`MailboxGateway`]. Every failure is classified into a
//! [`GatewayErrorKind`] so the engine can decide between individual retry,
//! failing a chunk outright, or aborting the request.

use async_trait::async_trait;
use thiserror::Error;

use crate::labels::LabelDelta;

/// Maximum number of message IDs accepted by one bulk call
pub const BATCH_CALL_LIMIT: usize = 100;

/// Classification of a gateway failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// HTTP 400: malformed request or an invalid ID in the set
    InvalidRequest,
    /// HTTP 404: message (or one of the messages) does not exist
    NotFound,
    /// HTTP 429, or 403 carrying a quota/rate-limit reason
    RateLimited,
    /// HTTP 401, or 403 without a quota reason
    Unauthorized,
    /// HTTP 5xx, connect failures, timeouts and other transport errors
    Unavailable,
    /// Successful status with a body that could not be decoded
    Malformed,
    /// Any other non-success status
    Rejected,
}

/// Classified gateway failure with a human-readable reason
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GatewayError {
    /// Failure class
    pub kind: GatewayErrorKind,
    /// HTTP status, when the service answered
    pub status: Option<u16>,
    /// Reason recorded in reports and errors
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// 400/404 may point at a single bad ID, so per-message retry can isolate
    /// it. Anything else would only multiply load.
    pub fn is_retryable_individually(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorKind::InvalidRequest | GatewayErrorKind::NotFound
        )
    }

    /// No further call can succeed with these credentials.
    pub fn is_fatal(&self) -> bool {
        self.kind == GatewayErrorKind::Unauthorized
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Operations the batch engine and tools need from the mail service
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// Current label IDs of a message
    async fn get_labels(&self, id: &str) -> GatewayResult<Vec<String>>;

    /// Apply `delta` to up to [`BATCH_CALL_LIMIT`] messages in one call
    async fn batch_modify(&self, ids: &[String], delta: &LabelDelta) -> GatewayResult<()>;

    /// Apply `delta` to one message, returning its resulting labels
    async fn modify_single(&self, id: &str, delta: &LabelDelta) -> GatewayResult<Vec<String>>;

    /// Remove a set of messages in one call
    async fn batch_delete(&self, ids: &[String]) -> GatewayResult<()>;

    /// Move one message to trash
    async fn trash(&self, id: &str) -> GatewayResult<Vec<String>>;

    /// Restore one message from trash
    async fn untrash(&self, id: &str) -> GatewayResult<Vec<String>>;
}
