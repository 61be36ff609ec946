//! Batch execution and verification
//!
//! Drives one batch request through the gateway. Label modifications run
//! chunk by chunk:
//!
//! 1. pre-validate (optional): fetch current labels, skip messages that
//!    cannot take the change or cannot be read
//! 2. bulk apply with one `batch_modify` call
//! 3. verify (optional): re-fetch labels and queue mismatches for retry
//! 4. retry queued messages one at a time with `modify_single`
//!
//! Per-message failures end up in the [`BatchReport`]. Only credential
//! failures and a failed trash call abort the request.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::errors::AppResult;
use crate::gateway::{GatewayResult, MailboxGateway};
use crate::labels::{INBOX, LabelDelta, SPAM, TRASH, UNREAD};
use crate::report::{BatchReport, MessageStatus, OutcomeLedger, ReportAction};
use crate::scheduler::{Chunk, ChunkScheduler};

/// Reason recorded for messages in SPAM or TRASH when the delta would touch
/// UNREAD or INBOX
pub const QUARANTINE_SKIP_REASON: &str = "cannot modify UNREAD/INBOX on SPAM/TRASH messages";
/// Reason recorded when verification finds the labels unchanged
pub const VERIFICATION_MISMATCH_REASON: &str = "labels not updated as expected";
/// Reason recorded for every message of a request with an empty delta
pub const NO_CHANGES_REASON: &str = "no label changes requested";

/// Per-request execution toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Fetch labels before the bulk call
    pub prevalidate: bool,
    /// Re-fetch labels after the bulk call
    pub verify: bool,
    /// Maximum label fetches in flight
    pub fetch_concurrency: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            prevalidate: true,
            verify: true,
            fetch_concurrency: 10,
        }
    }
}

/// What to do with the messages of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchAction {
    /// Apply a resolved label delta
    Modify(LabelDelta),
    /// Hand the whole list to the bulk delete endpoint
    Trash,
}

/// One batch request; `message_ids` may contain duplicates
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub message_ids: Vec<String>,
    pub action: BatchAction,
}

/// Why a message landed in the individual retry queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryCause {
    BulkRejected,
    VerificationMismatch,
}

pub struct BatchExecutor<'g> {
    gateway: &'g dyn MailboxGateway,
    policy: ExecutionPolicy,
    scheduler: ChunkScheduler,
}

impl<'g> BatchExecutor<'g> {
    pub fn new(
        gateway: &'g dyn MailboxGateway,
        policy: ExecutionPolicy,
        scheduler: ChunkScheduler,
    ) -> Self {
        Self {
            gateway,
            policy,
            scheduler,
        }
    }

    pub async fn execute(&self, request: &BatchRequest) -> AppResult<BatchReport> {
        let ids = &request.message_ids;
        match &request.action {
            BatchAction::Trash => self.trash_all(ids).await,
            BatchAction::Modify(delta) if delta.is_empty() => {
                info!(total = ids.len(), "empty label delta, nothing to send");
                let mut ledger = OutcomeLedger::new(ids);
                ledger.record_all(ids, &MessageStatus::Skipped(NO_CHANGES_REASON.to_owned()));
                Ok(ledger.finish(ReportAction::NoChanges, Some(delta.clone())))
            }
            BatchAction::Modify(delta) => self.modify_all(ids, delta).await,
        }
    }

    async fn trash_all(&self, ids: &[String]) -> AppResult<BatchReport> {
        info!(total = ids.len(), "moving messages to trash");
        let mut ledger = OutcomeLedger::new(ids);
        if let Err(err) = self.gateway.batch_delete(ids).await {
            warn!(error = %err, "batch delete failed");
            return Err(err.into());
        }
        ledger.record_all(ids, &MessageStatus::Success);
        Ok(ledger.finish(ReportAction::BatchMovedToTrash, None))
    }

    async fn modify_all(&self, ids: &[String], delta: &LabelDelta) -> AppResult<BatchReport> {
        let chunks = self.scheduler.plan(ids);
        info!(
            total = ids.len(),
            chunks = chunks.len(),
            chunk_size = self.scheduler.chunk_size(),
            add = ?delta.add,
            remove = ?delta.remove,
            prevalidate = self.policy.prevalidate,
            verify = self.policy.verify,
            "starting batch modify"
        );

        let mut ledger = OutcomeLedger::new(ids);
        for chunk in &chunks {
            self.scheduler.pace(chunk).await;
            self.run_chunk(chunk, delta, &mut ledger).await?;
            let summary = ledger.close_chunk(chunk.index, chunk.ids);
            info!(
                chunk = summary.index,
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "chunk complete"
            );
        }

        let report = ledger.finish(ReportAction::BatchModified, Some(delta.clone()));
        info!(
            successful = report.successful.len(),
            changed = report.newly_changed(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "batch modify complete"
        );
        Ok(report)
    }

    async fn run_chunk(
        &self,
        chunk: &Chunk<'_>,
        delta: &LabelDelta,
        ledger: &mut OutcomeLedger,
    ) -> AppResult<()> {
        let distinct = distinct(chunk.ids);
        let validated = if self.policy.prevalidate {
            self.prevalidate(&distinct, delta, ledger).await?
        } else {
            distinct
        };
        if validated.is_empty() {
            debug!(chunk = chunk.index, "nothing left to send");
            return Ok(());
        }

        let queue = match self.gateway.batch_modify(&validated, delta).await {
            Ok(()) if self.policy.verify => self.verify(&validated, delta, ledger).await?,
            Ok(()) => {
                ledger.record_all(&validated, &MessageStatus::Success);
                Vec::new()
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) if err.is_retryable_individually() => {
                warn!(
                    chunk = chunk.index,
                    error = %err,
                    "bulk modify rejected, retrying individually"
                );
                validated
                    .into_iter()
                    .map(|id| (id, RetryCause::BulkRejected))
                    .collect()
            }
            Err(err) => {
                warn!(chunk = chunk.index, error = %err, "bulk modify failed");
                ledger.record_all(&validated, &MessageStatus::Failed(err.message));
                Vec::new()
            }
        };

        self.retry_individually(queue, delta, ledger).await
    }

    /// Returns the IDs that may be sent; everything else is recorded as skipped
    async fn prevalidate(
        &self,
        ids: &[String],
        delta: &LabelDelta,
        ledger: &mut OutcomeLedger,
    ) -> AppResult<Vec<String>> {
        let touches_quarantine_sensitive = delta.touches(UNREAD) || delta.touches(INBOX);
        let mut validated = Vec::with_capacity(ids.len());

        for (id, fetched) in self.fetch_labels(ids).await {
            match fetched {
                Ok(labels) => {
                    let quarantined = labels.iter().any(|l| l == SPAM || l == TRASH);
                    if quarantined && touches_quarantine_sensitive {
                        debug!(message_id = %id, "skipping quarantined message");
                        let reason = QUARANTINE_SKIP_REASON.to_owned();
                        ledger.record(&id, MessageStatus::Skipped(reason));
                        continue;
                    }
                    if delta.is_satisfied_by(&labels) {
                        ledger.mark_unchanged(&id);
                    }
                    validated.push(id);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    debug!(message_id = %id, error = %err, "message not accessible");
                    ledger.record(&id, MessageStatus::Skipped(format!("not accessible: {err}")));
                }
            }
        }
        Ok(validated)
    }

    /// Records verified messages as successful and returns the rest
    async fn verify(
        &self,
        ids: &[String],
        delta: &LabelDelta,
        ledger: &mut OutcomeLedger,
    ) -> AppResult<Vec<(String, RetryCause)>> {
        let mut queue = Vec::new();
        for (id, fetched) in self.fetch_labels(ids).await {
            match fetched {
                Ok(labels) if delta.is_satisfied_by(&labels) => {
                    ledger.record(&id, MessageStatus::Success);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                _ => {
                    debug!(message_id = %id, "verification mismatch");
                    queue.push((id, RetryCause::VerificationMismatch));
                }
            }
        }
        if !queue.is_empty() {
            warn!(count = queue.len(), "labels not updated by bulk call");
        }
        Ok(queue)
    }

    async fn retry_individually(
        &self,
        queue: Vec<(String, RetryCause)>,
        delta: &LabelDelta,
        ledger: &mut OutcomeLedger,
    ) -> AppResult<()> {
        for (id, cause) in queue {
            match self.gateway.modify_single(&id, delta).await {
                Ok(_) => ledger.record(&id, MessageStatus::Success),
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    let reason = match cause {
                        RetryCause::BulkRejected => err.message,
                        RetryCause::VerificationMismatch => format!(
                            "{VERIFICATION_MISMATCH_REASON}; individual retry failed: {}",
                            err.message
                        ),
                    };
                    debug!(message_id = %id, %reason, "individual retry failed");
                    ledger.record(&id, MessageStatus::Failed(reason));
                }
            }
        }
        Ok(())
    }

    /// Fetch labels for `ids` with bounded concurrency, in input order
    async fn fetch_labels(&self, ids: &[String]) -> Vec<(String, GatewayResult<Vec<String>>)> {
        stream::iter(ids.iter().cloned())
            .map(|id| async move {
                let fetched = self.gateway.get_labels(&id).await;
                (id, fetched)
            })
            .buffered(self.policy.fetch_concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }
}

/// Order-preserving de-duplication of a chunk's IDs
fn distinct(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
