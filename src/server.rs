//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers 4 MCP tools. Handles
//! input validation, gateway selection, and response formatting; the batch
//! engine itself lives in [`crate::executor`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::executor::{BatchAction, BatchExecutor, BatchRequest};
use crate::gateway::MailboxGateway;
use crate::gmail::GmailClient;
use crate::labels::{LabelChanges, LabelDelta};
use crate::models::{
    AccountInfo, BatchUpdateMessagesInput, GetMessageLabelsInput, MessageLabels, Meta,
    ToolEnvelope, UpdateAction, UpdateMessageInput, UpdateMessageResult,
};
use crate::report::{BatchReport, ReportAction};
use crate::scheduler::ChunkScheduler;

/// Maximum characters in a message ID
const MAX_MESSAGE_ID_CHARS: usize = 256;
/// Maximum characters in a label ID
const MAX_LABEL_ID_CHARS: usize = 128;

/// Gmail batch MCP server
///
/// Holds shared configuration and one gateway per configured account.
/// Implements MCP tool handlers via `#[tool]` attribute macro and
/// `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailBatchServer {
    /// Server config (accounts, timeouts, batch defaults, write flag)
    config: Arc<ServerConfig>,
    /// Mailbox gateways keyed by `account_id`
    gateways: Arc<BTreeMap<String, Arc<dyn MailboxGateway>>>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailBatchServer {
    /// Create a new MCP server instance
    ///
    /// Builds one Gmail REST client per configured account.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let mut gateways: BTreeMap<String, Arc<dyn MailboxGateway>> = BTreeMap::new();
        for account in config.accounts.values() {
            let client = GmailClient::from_config(&config, account)?;
            gateways.insert(account.account_id.clone(), Arc::new(client));
        }
        Ok(Self::with_gateways(config, gateways))
    }

    /// Create a server over pre-built gateways
    pub fn with_gateways(
        config: ServerConfig,
        gateways: BTreeMap<String, Arc<dyn MailboxGateway>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            gateways: Arc::new(gateways),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List configured Gmail accounts
    ///
    /// Returns account identifiers without exposing tokens.
    #[tool(
        name = "gmail_list_accounts",
        description = "List configured Gmail accounts"
    )]
    async fn list_accounts(&self) -> Result<Json<ToolEnvelope<Vec<AccountInfo>>>, ErrorData> {
        let started = Instant::now();
        let data = self
            .config
            .accounts
            .values()
            .map(|a| AccountInfo {
                account_id: a.account_id.clone(),
                user_id: a.user_id.clone(),
            })
            .collect::<Vec<_>>();
        finalize_tool(
            started,
            Ok((format!("{} account(s) configured", data.len()), data)),
        )
    }

    /// Tool: Read the labels of one message
    #[tool(
        name = "gmail_get_message_labels",
        description = "Get the label IDs currently applied to a message"
    )]
    async fn get_message_labels(
        &self,
        Parameters(input): Parameters<GetMessageLabelsInput>,
    ) -> Result<Json<ToolEnvelope<MessageLabels>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.get_message_labels_impl(input)
                .await
                .map(|data| (format!("{} label(s)", data.label_ids.len()), data)),
        )
    }

    /// Tool: Update one message
    ///
    /// Applies label changes, moves the message to trash, or restores it.
    /// Requires `GMAIL_MCP_WRITE_ENABLED=true`.
    #[tool(
        name = "gmail_update_message",
        description = "Add/remove labels on one message, or move it to or from trash"
    )]
    async fn update_message(
        &self,
        Parameters(input): Parameters<UpdateMessageInput>,
    ) -> Result<Json<ToolEnvelope<UpdateMessageResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.update_message_impl(input).await.map(|data| {
                let summary = match data.action {
                    UpdateAction::Modified => "Message labels updated",
                    UpdateAction::MovedToTrash => "Message moved to trash",
                    UpdateAction::RemovedFromTrash => "Message removed from trash",
                    UpdateAction::NoChanges => "No changes were made",
                };
                (summary.to_owned(), data)
            }),
        )
    }

    /// Tool: Apply one label change (or trash) to many messages
    ///
    /// Chunks the request, pre-validates and verifies each chunk, and retries
    /// failures individually. Partial failure is reported, not raised.
    /// Requires `GMAIL_MCP_WRITE_ENABLED=true`.
    #[tool(
        name = "gmail_batch_update_messages",
        description = "Add/remove labels on many messages at once, or move them to trash; returns per-message outcomes"
    )]
    async fn batch_update_messages(
        &self,
        Parameters(input): Parameters<BatchUpdateMessagesInput>,
    ) -> Result<Json<ToolEnvelope<BatchReport>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.batch_update_impl(input)
                .await
                .map(|report| (batch_summary(&report), report)),
        )
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailBatchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Gmail label batch MCP server. Read tools are enabled by default; update tools require GMAIL_MCP_WRITE_ENABLED=true.",
        )
    }
}

/// Tool implementation methods
///
/// Private methods handle the actual business logic for each tool, separated
/// from the public `#[tool]` methods that handle response formatting.
impl GmailBatchServer {
    fn gateway(&self, account_id: &str) -> AppResult<&dyn MailboxGateway> {
        self.gateways
            .get(account_id)
            .map(|g| g.as_ref())
            .ok_or_else(|| AppError::NotFound(format!("account '{account_id}' is not configured")))
    }

    async fn get_message_labels_impl(
        &self,
        input: GetMessageLabelsInput,
    ) -> AppResult<MessageLabels> {
        validate_account_id(&input.account_id)?;
        validate_message_id(&input.message_id)?;
        let gateway = self.gateway(&input.account_id)?;

        let label_ids = gateway.get_labels(&input.message_id).await?;
        Ok(MessageLabels {
            account_id: input.account_id,
            message_id: input.message_id,
            label_ids,
        })
    }

    async fn update_message_impl(
        &self,
        input: UpdateMessageInput,
    ) -> AppResult<UpdateMessageResult> {
        require_write_enabled(&self.config)?;
        validate_account_id(&input.account_id)?;
        validate_message_id(&input.message_id)?;
        validate_label_changes(&input.changes)?;
        if input.move_to_trash && input.remove_from_trash {
            return Err(AppError::invalid(
                "move_to_trash and remove_from_trash are mutually exclusive",
            ));
        }
        let gateway = self.gateway(&input.account_id)?;
        let id = input.message_id.as_str();

        if input.move_to_trash {
            let label_ids = gateway.trash(id).await?;
            info!(account_id = %input.account_id, message_id = %id, "message moved to trash");
            return Ok(UpdateMessageResult {
                account_id: input.account_id.clone(),
                message_id: input.message_id.clone(),
                action: UpdateAction::MovedToTrash,
                label_ids,
                applied_delta: LabelDelta::default(),
            });
        }

        let delta = input.changes.resolve();
        let mut action = UpdateAction::NoChanges;
        let mut label_ids = None;
        if input.remove_from_trash {
            label_ids = Some(gateway.untrash(id).await?);
            action = UpdateAction::RemovedFromTrash;
        }
        if !delta.is_empty() {
            label_ids = Some(gateway.modify_single(id, &delta).await?);
            action = UpdateAction::Modified;
        }
        let label_ids = match label_ids {
            Some(labels) => labels,
            None => gateway.get_labels(id).await?,
        };
        info!(account_id = %input.account_id, message_id = %id, ?action, "message updated");

        Ok(UpdateMessageResult {
            account_id: input.account_id.clone(),
            message_id: input.message_id.clone(),
            action,
            label_ids,
            applied_delta: delta,
        })
    }

    async fn batch_update_impl(&self, input: BatchUpdateMessagesInput) -> AppResult<BatchReport> {
        require_write_enabled(&self.config)?;
        validate_account_id(&input.account_id)?;
        validate_message_ids(&input.message_ids, self.config.max_messages_per_request)?;
        validate_label_changes(&input.changes)?;
        let gateway = self.gateway(&input.account_id)?;

        let action = if input.move_to_trash {
            BatchAction::Trash
        } else {
            BatchAction::Modify(input.changes.resolve())
        };
        let executor = BatchExecutor::new(
            gateway,
            self.config.execution_policy(input.prevalidate, input.verify),
            ChunkScheduler::new(self.config.chunk_size, self.config.chunk_delay()),
        );
        let request = BatchRequest {
            message_ids: input.message_ids,
            action,
        };

        let span = info_span!(
            "batch",
            batch_id = %Uuid::new_v4(),
            account_id = %input.account_id,
            messages = request.message_ids.len()
        );
        let budget = self.config.batch_timeout();
        tokio::time::timeout(budget, executor.execute(&request))
            .instrument(span)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "batch did not finish within {} ms",
                    budget.as_millis()
                ))
            })?
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

fn batch_summary(report: &BatchReport) -> String {
    match report.action {
        ReportAction::NoChanges => "No changes were made".to_owned(),
        ReportAction::BatchMovedToTrash => {
            format!("{} message(s) moved to trash", report.successful.len())
        }
        ReportAction::BatchModified => format!(
            "{}/{} message(s) updated, {} failed, {} skipped",
            report.successful.len(),
            report.total,
            report.failed.len(),
            report.skipped.len()
        ),
    }
}

/// Validate account_id format
fn validate_account_id(account_id: &str) -> AppResult<()> {
    if account_id.is_empty() || account_id.len() > 64 {
        return Err(AppError::InvalidInput(
            "account_id must be 1..64 characters".to_owned(),
        ));
    }
    if !account_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(AppError::InvalidInput(
            "account_id must match [A-Za-z0-9_-]+".to_owned(),
        ));
    }
    Ok(())
}

/// Validate a Gmail message ID before it is placed in a request path
fn validate_message_id(message_id: &str) -> AppResult<()> {
    let len = message_id.chars().count();
    if len == 0 || len > MAX_MESSAGE_ID_CHARS {
        return Err(AppError::InvalidInput(format!(
            "message_id must be 1..{MAX_MESSAGE_ID_CHARS} characters"
        )));
    }
    if message_id
        .chars()
        .any(|ch| ch.is_whitespace() || ch.is_control() || ch == '/')
    {
        return Err(AppError::InvalidInput(format!(
            "invalid message_id '{message_id}'; IDs must not contain whitespace, control chars, or '/'"
        )));
    }
    Ok(())
}

fn validate_message_ids(message_ids: &[String], max: usize) -> AppResult<()> {
    if message_ids.is_empty() || message_ids.len() > max {
        return Err(AppError::InvalidInput(format!(
            "message_ids must contain 1..={max} entries"
        )));
    }
    message_ids.iter().try_for_each(|id| validate_message_id(id))
}

/// Validate explicit label IDs; flag-derived labels are always valid
fn validate_label_changes(changes: &LabelChanges) -> AppResult<()> {
    for (field, labels) in [
        ("add_label_ids", &changes.add_label_ids),
        ("remove_label_ids", &changes.remove_label_ids),
    ] {
        for label in labels.iter().flatten() {
            let len = label.chars().count();
            if len == 0 || len > MAX_LABEL_ID_CHARS {
                return Err(AppError::InvalidInput(format!(
                    "{field} entries must be 1..{MAX_LABEL_ID_CHARS} characters"
                )));
            }
            if label.chars().any(char::is_control) {
                return Err(AppError::InvalidInput(format!(
                    "{field} must not contain control characters"
                )));
            }
        }
    }
    Ok(())
}

/// Check if write operations are enabled
fn require_write_enabled(config: &ServerConfig) -> AppResult<()> {
    if !config.write_enabled {
        return Err(AppError::InvalidInput(
            "write tools are disabled; set GMAIL_MCP_WRITE_ENABLED=true".to_owned(),
        ));
    }
    Ok(())
}
