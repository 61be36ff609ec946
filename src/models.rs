//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::{LabelChanges, LabelDelta};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Account metadata (no credentials)
///
/// Returned by `gmail_list_accounts`. The access token is never included.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountInfo {
    /// Account identifier
    pub account_id: String,
    /// Gmail user the account acts as (`me` for the token owner)
    pub user_id: String,
}

/// Input: read the labels of one message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetMessageLabelsInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message ID
    pub message_id: String,
}

/// Labels currently applied to a message
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageLabels {
    pub account_id: String,
    pub message_id: String,
    /// Label IDs (e.g., `INBOX`, `UNREAD`, `Label_123`)
    pub label_ids: Vec<String>,
}

/// Input: change labels or trash state of one message
///
/// Used by `gmail_update_message`. Requires `GMAIL_MCP_WRITE_ENABLED=true`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateMessageInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message ID
    pub message_id: String,
    /// Label additions/removals and convenience flags
    #[serde(flatten)]
    pub changes: LabelChanges,
    /// Move the message to trash (label changes are ignored)
    #[serde(default)]
    pub move_to_trash: bool,
    /// Restore the message from trash before applying label changes
    #[serde(default)]
    pub remove_from_trash: bool,
}

/// What `gmail_update_message` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Modified,
    MovedToTrash,
    RemovedFromTrash,
    NoChanges,
}

/// Result of `gmail_update_message`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateMessageResult {
    pub account_id: String,
    pub message_id: String,
    pub action: UpdateAction,
    /// Labels on the message after the update
    pub label_ids: Vec<String>,
    /// Resolved label delta (empty for trash)
    pub applied_delta: LabelDelta,
}

/// Input: apply one label change or trash to many messages
///
/// Used by `gmail_batch_update_messages`. Requires
/// `GMAIL_MCP_WRITE_ENABLED=true`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BatchUpdateMessagesInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message IDs; duplicates are allowed and reported per position
    pub message_ids: Vec<String>,
    /// Label additions/removals and convenience flags
    #[serde(flatten)]
    pub changes: LabelChanges,
    /// Send every message to the bulk delete endpoint instead of changing
    /// labels
    #[serde(default)]
    pub move_to_trash: bool,
    /// Override the server's pre-validation default
    pub prevalidate: Option<bool>,
    /// Override the server's verification default
    pub verify: Option<bool>,
}

/// Default value for `account_id` field
pub fn default_account_id() -> String {
    "default".to_owned()
}
