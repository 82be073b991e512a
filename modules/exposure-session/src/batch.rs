//! Capacity-bounded, strictly sequential key submission.
//!
//! Runs on a blocking worker: each batch blocks the thread until the session's
//! completion callback for that batch fires. The callback arrives on the
//! platform's own thread, so blocking the async driver here would deadlock.

use std::time::Duration;

use tracing::{debug, warn};

use exposure_common::{DiagnosisKey, SubmissionError};

use crate::cancel::CancelToken;
use crate::completion::Completion;
use crate::traits::MatchingSession;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    pub batches: usize,
    pub keys: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchSubmitter {
    callback_timeout: Option<Duration>,
}

impl BatchSubmitter {
    pub fn new(callback_timeout: Option<Duration>) -> Self {
        Self { callback_timeout }
    }

    /// Batch sizes for `key_count` keys at `capacity` keys per batch.
    pub fn plan(key_count: usize, capacity: usize) -> Vec<usize> {
        if capacity == 0 {
            return Vec::new();
        }
        let full = key_count / capacity;
        let mut sizes = vec![capacity; full];
        if key_count % capacity > 0 {
            sizes.push(key_count % capacity);
        }
        sizes
    }

    /// Submit `keys` in order, one batch at a time, stopping at the first
    /// rejected batch. Batches already accepted stay accepted.
    pub fn submit(
        &self,
        session: &dyn MatchingSession,
        keys: &[DiagnosisKey],
        cancel: &CancelToken,
    ) -> Result<SubmissionStats, SubmissionError> {
        let mut stats = SubmissionStats::default();
        if keys.is_empty() {
            return Ok(stats);
        }

        let capacity = session.maximum_key_count();
        if capacity == 0 {
            return Err(SubmissionError::InvalidCapacity);
        }

        let mut offset = 0;
        for (batch, size) in Self::plan(keys.len(), capacity).into_iter().enumerate() {
            let chunk = &keys[offset..offset + size];
            offset += size;

            if cancel.is_cancelled() {
                return Err(SubmissionError::Cancelled { batch });
            }

            let (done, pending) = Completion::blocking();
            session.submit_batch(chunk, done);

            if let Err(cause) = pending.wait(self.callback_timeout) {
                warn!(
                    batch,
                    batch_keys = chunk.len(),
                    accepted_keys = stats.keys,
                    error = %cause,
                    "Key batch rejected, aborting submission"
                );
                return Err(SubmissionError::Rejected { batch, cause });
            }

            stats.batches += 1;
            stats.keys += chunk.len();
            debug!(batch, batch_keys = chunk.len(), "Key batch accepted");
        }

        Ok(stats)
    }
}
