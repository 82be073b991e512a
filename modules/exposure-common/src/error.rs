use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors delivered by the platform through a session completion callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("platform error: {0}")]
    Platform(String),

    /// The completion handle was dropped without being invoked.
    #[error("completion callback dropped without a result")]
    Dropped,

    #[error("no completion callback within {0:?}")]
    TimedOut(std::time::Duration),
}

/// Errors from the batched key submission loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("batch {batch} rejected: {cause}")]
    Rejected {
        batch: usize,
        #[source]
        cause: SessionError,
    },

    #[error("session reported a maximum key count of zero")]
    InvalidCapacity,

    #[error("cancelled before batch {batch}")]
    Cancelled { batch: usize },

    #[error("submission worker terminated: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("config fetch failed: {0:#}")]
    ConfigFetch(anyhow::Error),

    #[error("key fetch failed: {0:#}")]
    KeyFetch(anyhow::Error),

    #[error("session activation failed: {0}")]
    Activation(#[source] SessionError),

    #[error("key submission failed: {0}")]
    Submission(#[from] SubmissionError),

    #[error("session finish failed: {0}")]
    Finish(#[source] SessionError),

    /// The platform broke its own contract (e.g. finish succeeded without a summary).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("exposure enumeration failed: {0}")]
    Enumeration(#[source] SessionError),

    #[error("run cancelled while {stage}")]
    Cancelled { stage: RunStage },

    #[error("another detection run is in progress")]
    Busy,

    #[error("last run at {last_run} is too recent; next run allowed after {next_eligible}")]
    Throttled {
        last_run: DateTime<Utc>,
        next_eligible: DateTime<Utc>,
    },

    #[error("run recorder error: {0:#}")]
    Recorder(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DetectionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ConfigFetch(_) => FailureKind::ConfigFetch,
            Self::KeyFetch(_) => FailureKind::KeyFetch,
            Self::Activation(_) => FailureKind::Activation,
            Self::Submission(SubmissionError::Cancelled { .. }) => FailureKind::Cancelled,
            Self::Submission(_) => FailureKind::Submission,
            Self::Finish(_) => FailureKind::Finish,
            Self::InvariantViolation(_) => FailureKind::InvariantViolation,
            Self::Enumeration(_) => FailureKind::Enumeration,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Busy => FailureKind::Busy,
            Self::Throttled { .. } => FailureKind::Throttled,
            Self::Recorder(_) => FailureKind::Recorder,
            Self::Config(_) => FailureKind::Config,
        }
    }

    /// True for failures that indicate a broken platform contract rather than
    /// an ordinary run failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConfigFetch,
    KeyFetch,
    Activation,
    Submission,
    Finish,
    InvariantViolation,
    Enumeration,
    Cancelled,
    Busy,
    Throttled,
    Recorder,
    Config,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigFetch => write!(f, "config_fetch"),
            Self::KeyFetch => write!(f, "key_fetch"),
            Self::Activation => write!(f, "activation"),
            Self::Submission => write!(f, "submission"),
            Self::Finish => write!(f, "finish"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
            Self::Enumeration => write!(f, "enumeration"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Busy => write!(f, "busy"),
            Self::Throttled => write!(f, "throttled"),
            Self::Recorder => write!(f, "recorder"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// Lifecycle stages of a single orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    Idle,
    Activating,
    Submitting,
    Finishing,
    Finished,
    Failed,
}

impl RunStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether `self -> next` is an edge of the run state machine.
    pub fn can_advance_to(&self, next: RunStage) -> bool {
        use RunStage::*;
        matches!(
            (self, next),
            (Idle, Activating)
                | (Activating, Submitting)
                | (Submitting, Finishing)
                | (Finishing, Finished)
                | (Activating | Submitting | Finishing, Failed)
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Activating => write!(f, "activating"),
            Self::Submitting => write!(f, "submitting"),
            Self::Finishing => write!(f, "finishing"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
