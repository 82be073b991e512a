//! Platform boundary for exposure matching.
//!
//! The matching engine is owned by the host platform and speaks in completion
//! callbacks. Every async operation takes a `Completion` that the platform
//! invokes exactly once, possibly from its own notification thread.

use exposure_common::{DiagnosisKey, ExposurePage, ExposureSummary, MatchingConfig};

use crate::completion::Completion;

/// A single-use matching session handle.
///
/// A session does not accept concurrent submissions: the caller waits for each
/// `submit_batch` completion before issuing the next call.
pub trait MatchingSession: Send + Sync {
    /// Maximum number of keys accepted by one `submit_batch` call.
    fn maximum_key_count(&self) -> usize;

    fn activate(&self, config: &MatchingConfig, done: Completion<()>);

    fn submit_batch(&self, keys: &[DiagnosisKey], done: Completion<()>);

    /// Completes with `Ok(None)` only if the platform breaks its contract.
    fn finish(&self, done: Completion<Option<ExposureSummary>>);

    fn enumerate(&self, max_count: usize, done: Completion<ExposurePage>);

    /// Tear the session down. Called once, after which the handle is discarded.
    fn invalidate(&self);
}

/// Constructs a fresh session per run.
pub trait SessionFactory: Send + Sync {
    fn create(&self) -> Box<dyn MatchingSession>;
}
