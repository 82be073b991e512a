pub mod detector;
pub mod notify;
pub mod sources;
pub mod types;

pub use detector::{DetectorDeps, ExposureDetector};
pub use notify::{fanout::ObserverFanout, log::LogObserver};
pub use sources::{ConfigSource, KeySource};
pub use types::DetectionReport;
