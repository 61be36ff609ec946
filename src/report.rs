//! Batch outcome accumulation and reporting
//!
//! [`OutcomeLedger`] is threaded through the chunk loop and collects one
//! status per message ID. Later writes replace earlier ones, so an individual
//! retry overrides the chunk-level outcome. [`OutcomeLedger::finish`] expands
//! the ledger back to one entry per input position.

use std::collections::{HashMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::labels::LabelDelta;

/// Final state of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Success,
    Failed(String),
    /// Excluded by policy; not an error
    Skipped(String),
}

/// What the batch did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportAction {
    /// Labels were modified
    BatchModified,
    /// Messages were sent to the batch delete endpoint
    BatchMovedToTrash,
    /// The resolved delta was empty; nothing was sent
    NoChanges,
}

/// Overall state of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// No failures, at least one success
    Success,
    /// Some successes and some failures
    Partial,
    /// Failures and no successes
    Failed,
    /// Every message was skipped
    Skipped,
}

/// Per-chunk detail
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChunkSummary {
    /// Zero-based chunk position
    pub index: usize,
    /// Message IDs in the chunk (duplicates included)
    pub message_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub status: ChunkStatus,
}

/// A message with the reason it failed or was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MessageIssue {
    pub message_id: String,
    pub reason: String,
}

/// Structured result of a batch request
///
/// `total` always equals `successful + failed + skipped`, counted per input
/// position.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchReport {
    /// Operation performed
    pub action: ReportAction,
    /// `true` when nothing failed; skips do not count as failures
    pub success: bool,
    /// Number of message IDs supplied (duplicates included)
    pub total: usize,
    /// Messages whose change was applied
    pub successful: Vec<String>,
    /// Messages that could not be changed, with reasons
    pub failed: Vec<MessageIssue>,
    /// Messages excluded by policy, with reasons
    pub skipped: Vec<MessageIssue>,
    /// Successful messages that already had the requested labels before the
    /// batch ran (only known when pre-validation is enabled)
    pub unchanged: Vec<String>,
    /// Per-chunk detail, in dispatch order
    pub chunks: Vec<ChunkSummary>,
    /// Resolved label delta (absent for trash)
    pub applied_delta: Option<LabelDelta>,
}

impl BatchReport {
    /// Messages this run actually changed
    pub fn newly_changed(&self) -> usize {
        self.successful.len() - self.unchanged.len()
    }
}

/// Accumulator threaded through the chunk loop
#[derive(Debug)]
pub struct OutcomeLedger {
    order: Vec<String>,
    statuses: HashMap<String, MessageStatus>,
    unchanged: HashSet<String>,
    chunks: Vec<ChunkSummary>,
}

impl OutcomeLedger {
    pub fn new(message_ids: &[String]) -> Self {
        Self {
            order: message_ids.to_vec(),
            statuses: HashMap::with_capacity(message_ids.len()),
            unchanged: HashSet::new(),
            chunks: Vec::new(),
        }
    }

    /// Record `status` for `id`, replacing any earlier status
    pub fn record(&mut self, id: &str, status: MessageStatus) {
        self.statuses.insert(id.to_owned(), status);
    }

    /// Record the same status for every ID in `ids`
    pub fn record_all<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a String>,
        status: &MessageStatus,
    ) {
        for id in ids {
            self.record(id, status.clone());
        }
    }

    /// Note that `id` already carried the requested labels
    ///
    /// Ignored once `id` has succeeded in this batch: a repeated ID sees the
    /// labels an earlier chunk applied.
    pub fn mark_unchanged(&mut self, id: &str) {
        if self.statuses.get(id) != Some(&MessageStatus::Success) {
            self.unchanged.insert(id.to_owned());
        }
    }

    /// Summarize a finished chunk from the statuses currently recorded
    pub fn close_chunk(&mut self, index: usize, ids: &[String]) -> &ChunkSummary {
        let (mut succeeded, mut failed, mut skipped) = (0, 0, 0);
        for id in ids {
            match self.statuses.get(id) {
                Some(MessageStatus::Success) => succeeded += 1,
                Some(MessageStatus::Skipped(_)) => skipped += 1,
                Some(MessageStatus::Failed(_)) | None => failed += 1,
            }
        }
        let status = match (succeeded, failed) {
            (0, 0) => ChunkStatus::Skipped,
            (_, 0) => ChunkStatus::Success,
            (0, _) => ChunkStatus::Failed,
            _ => ChunkStatus::Partial,
        };
        self.chunks.push(ChunkSummary {
            index,
            message_count: ids.len(),
            succeeded,
            failed,
            skipped,
            status,
        });
        &self.chunks[self.chunks.len() - 1]
    }

    /// Expand to one outcome per input position and build the report
    pub fn finish(self, action: ReportAction, applied_delta: Option<LabelDelta>) -> BatchReport {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut unchanged = Vec::new();

        for id in &self.order {
            match self.statuses.get(id) {
                Some(MessageStatus::Success) => {
                    if self.unchanged.contains(id) {
                        unchanged.push(id.clone());
                    }
                    successful.push(id.clone());
                }
                Some(MessageStatus::Failed(reason)) => failed.push(MessageIssue {
                    message_id: id.clone(),
                    reason: reason.clone(),
                }),
                Some(MessageStatus::Skipped(reason)) => skipped.push(MessageIssue {
                    message_id: id.clone(),
                    reason: reason.clone(),
                }),
                None => failed.push(MessageIssue {
                    message_id: id.clone(),
                    reason: "message was not processed".to_owned(),
                }),
            }
        }

        BatchReport {
            action,
            success: failed.is_empty(),
            total: self.order.len(),
            successful,
            failed,
            skipped,
            unchanged,
            chunks: self.chunks,
            applied_delta,
        }
    }
}
