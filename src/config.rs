//! Configuration module for Gmail accounts and server settings
//!
//! All configuration is loaded from environment variables following the pattern
//! `GMAIL_MCP_<SEGMENT>_<KEY>`. Account segments are discovered by scanning for
//! `GMAIL_MCP_*_ACCESS_TOKEN` variables.

use std::collections::BTreeMap;
use std::env;
use std::env::VarError;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;

use crate::errors::{AppError, AppResult};
use crate::executor::ExecutionPolicy;
use crate::gateway::BATCH_CALL_LIMIT;
use crate::gmail::DEFAULT_API_BASE_URL;

/// Gmail account configuration
///
/// Holds the API identity and bearer token for a single mailbox. The token is
/// stored using `SecretString` to prevent accidental logging; acquiring and
/// refreshing it is left to whoever launches the server.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Account identifier (lowercase, used as `account_id` parameter)
    pub account_id: String,
    /// Gmail `userId` path parameter (`me` for the token owner)
    pub user_id: String,
    /// OAuth bearer token with the `gmail.modify` scope
    pub access_token: SecretString,
}

/// Server-wide configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// All configured accounts, keyed by `account_id`
    pub accounts: BTreeMap<String, AccountConfig>,
    /// Gmail REST API origin
    pub api_base_url: String,
    /// Whether mutating tools (label updates, trash) are enabled
    pub write_enabled: bool,
    /// TCP/TLS connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-HTTP-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Whole-batch budget in milliseconds
    pub batch_timeout_ms: u64,
    /// Messages per bulk call (1..=100)
    pub chunk_size: usize,
    /// Pause between consecutive chunks in milliseconds
    pub chunk_delay_ms: u64,
    /// Default for the pre-validation step
    pub prevalidate: bool,
    /// Default for the post-apply verification step
    pub verify: bool,
    /// Maximum label fetches in flight during validation/verification
    pub verify_concurrency: usize,
    /// Upper bound on `message_ids` per batch request
    pub max_messages_per_request: usize,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// Discovers accounts by scanning for `GMAIL_MCP_*_ACCESS_TOKEN` patterns.
    /// If no accounts are explicitly defined, a `default` account is required
    /// via `GMAIL_MCP_DEFAULT_ACCESS_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// GMAIL_MCP_DEFAULT_ACCESS_TOKEN=ya29.a0Af...
    /// GMAIL_MCP_WORK_ACCESS_TOKEN=ya29.b1Bg...
    /// GMAIL_MCP_WORK_USER_ID=me
    /// GMAIL_MCP_WRITE_ENABLED=true
    /// GMAIL_MCP_CHUNK_DELAY_MS=1000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let account_pattern = Regex::new(r"^GMAIL_MCP_([A-Z0-9_]+)_ACCESS_TOKEN$")
            .map_err(|e| AppError::Internal(format!("invalid account regex: {e}")))?;

        let mut account_segments: Vec<String> = env::vars()
            .filter_map(|(k, _)| {
                account_pattern
                    .captures(&k)
                    .and_then(|c| c.get(1).map(|m| m.as_str().to_owned()))
            })
            .collect();

        if account_segments.is_empty() {
            account_segments.push("DEFAULT".to_owned());
        }

        account_segments.sort();
        account_segments.dedup();

        let mut accounts = BTreeMap::new();
        for seg in account_segments {
            let account = load_account(&seg)?;
            accounts.insert(account.account_id.clone(), account);
        }

        let chunk_size = parse_usize_env("GMAIL_MCP_CHUNK_SIZE", BATCH_CALL_LIMIT)?;
        validate_range("GMAIL_MCP_CHUNK_SIZE", chunk_size, 1, BATCH_CALL_LIMIT)?;
        let verify_concurrency = parse_usize_env("GMAIL_MCP_VERIFY_CONCURRENCY", 10)?;
        validate_range("GMAIL_MCP_VERIFY_CONCURRENCY", verify_concurrency, 1, 100)?;
        let max_messages_per_request =
            parse_usize_env("GMAIL_MCP_MAX_MESSAGES_PER_REQUEST", 1_000)?;
        validate_range(
            "GMAIL_MCP_MAX_MESSAGES_PER_REQUEST",
            max_messages_per_request,
            1,
            100_000,
        )?;

        Ok(Self {
            accounts,
            api_base_url: optional_env("GMAIL_MCP_API_BASE_URL")?
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned()),
            write_enabled: parse_bool_env("GMAIL_MCP_WRITE_ENABLED", false)?,
            connect_timeout_ms: parse_u64_env("GMAIL_MCP_CONNECT_TIMEOUT_MS", 10_000)?,
            request_timeout_ms: parse_u64_env("GMAIL_MCP_REQUEST_TIMEOUT_MS", 30_000)?,
            batch_timeout_ms: parse_u64_env("GMAIL_MCP_BATCH_TIMEOUT_MS", 600_000)?,
            chunk_size,
            chunk_delay_ms: parse_u64_env("GMAIL_MCP_CHUNK_DELAY_MS", 1_000)?,
            prevalidate: parse_bool_env("GMAIL_MCP_PREVALIDATE", true)?,
            verify: parse_bool_env("GMAIL_MCP_VERIFY", true)?,
            verify_concurrency,
            max_messages_per_request,
        })
    }

    /// Executor policy from server defaults, with optional per-request
    /// overrides for the two strategy toggles.
    pub fn execution_policy(
        &self,
        prevalidate: Option<bool>,
        verify: Option<bool>,
    ) -> ExecutionPolicy {
        ExecutionPolicy {
            prevalidate: prevalidate.unwrap_or(self.prevalidate),
            verify: verify.unwrap_or(self.verify),
            fetch_concurrency: self.verify_concurrency,
        }
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

/// Load a single account configuration from environment
///
/// Reads `GMAIL_MCP_<SEGMENT>_ACCESS_TOKEN` and `_USER_ID`. Normalizes the
/// segment name to lowercase for `account_id`.
fn load_account(segment: &str) -> AppResult<AccountConfig> {
    let prefix = format!("GMAIL_MCP_{}_", sanitize_segment(segment));
    let access_token = required_env(&format!("{prefix}ACCESS_TOKEN"))?;
    let user_id = optional_env(&format!("{prefix}USER_ID"))?.unwrap_or_else(|| "me".to_owned());

    Ok(AccountConfig {
        account_id: segment.to_ascii_lowercase(),
        user_id,
        access_token: SecretString::new(access_token.into()),
    })
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable; blank counts as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Sanitize an account segment to uppercase alphanumeric/underscore
///
/// Non-alphanumeric characters are replaced with underscores, and leading/
/// trailing underscores are trimmed.
fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    for ch in seg.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push('_');
        }
    }
    out.trim_matches('_').to_owned()
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` environment variable with default fallback
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn validate_range(key: &str, value: usize, min: usize, max: usize) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{key} must be in range {min}..={max}, got {value}"
        )));
    }
    Ok(())
}
