//! Exposure matching session orchestration.
//!
//! Drives one detection run against a platform-owned matching session:
//! activate → submit keys in capacity-bounded batches → finish → enumerate.
//! Platform callbacks are bridged into single-shot channels so the lifecycle
//! reads as straight-line async code with exactly one terminal outcome.
//!
//! The session, the run recorder, and the observer are all traits so tests
//! can substitute the scripted doubles in `testing`.

pub mod batch;
pub mod cancel;
pub mod completion;
pub mod observer;
pub mod orchestrator;
pub mod recorder;
pub mod traits;
pub mod window;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use batch::{BatchSubmitter, SubmissionStats};
pub use cancel::CancelToken;
pub use completion::{BlockingPending, Completion, Pending};
pub use observer::{NoopObserver, RunObserver};
pub use orchestrator::{OrchestratorOptions, RunPermit, RunReport, SessionOrchestrator};
pub use recorder::{FileRunRecorder, MemoryRunRecorder, RunRecorder};
pub use traits::{MatchingSession, SessionFactory};
pub use window::WindowPolicy;
