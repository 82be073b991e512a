pub mod types;
pub mod config;
pub mod error;

pub use types::*;
pub use config::DetectionConfig;
pub use error::{DetectionError, FailureKind, RunStage, SessionError, SubmissionError};
