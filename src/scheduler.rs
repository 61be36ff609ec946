//! Chunk planning and inter-chunk pacing
//!
//! Splits a batch into contiguous slices no larger than the gateway's
//! per-call limit and spaces out their dispatch to stay under the service's
//! rate limits.

use std::time::Duration;

use tracing::debug;

use crate::gateway::BATCH_CALL_LIMIT;

/// Contiguous slice of the request's message IDs
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Zero-based position in dispatch order
    pub index: usize,
    /// Message IDs, in request order
    pub ids: &'a [String],
}

/// Chunk planner and pacer
#[derive(Debug, Clone)]
pub struct ChunkScheduler {
    chunk_size: usize,
    pacing: Duration,
}

impl ChunkScheduler {
    /// `chunk_size` is clamped to `1..=BATCH_CALL_LIMIT`
    pub fn new(chunk_size: usize, pacing: Duration) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, BATCH_CALL_LIMIT),
            pacing,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Partition `ids` into ordered chunks covering every entry exactly once
    pub fn plan<'a>(&self, ids: &'a [String]) -> Vec<Chunk<'a>> {
        ids.chunks(self.chunk_size)
            .enumerate()
            .map(|(index, ids)| Chunk { index, ids })
            .collect()
    }

    /// Wait before dispatching `chunk`; the first chunk goes immediately.
    pub async fn pace(&self, chunk: &Chunk<'_>) {
        if chunk.index == 0 || self.pacing.is_zero() {
            return;
        }
        debug!(chunk = chunk.index, delay = ?self.pacing, "pacing");
        tokio::time::sleep(self.pacing).await;
    }
}

impl Default for ChunkScheduler {
    fn default() -> Self {
        Self::new(BATCH_CALL_LIMIT, Duration::from_secs(1))
    }
}
