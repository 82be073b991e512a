use std::fmt;

use exposure_common::RunWindow;
use exposure_session::RunReport;

/// Result of a completed detection: the window keys were fetched for plus
/// what the session run produced.
#[derive(Debug, Clone)]
pub struct DetectionReport {
    pub window: RunWindow,
    pub run: RunReport,
}

impl DetectionReport {
    pub fn exposed(&self) -> bool {
        self.run.summary.has_exposure()
    }
}

impl fmt::Display for DetectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={} window={} batches={} keys_submitted={} {} exposures={}{}",
            self.run.run_id,
            self.window,
            self.run.submission.batches,
            self.run.submission.keys,
            self.run.summary,
            self.run.exposures.len(),
            if self.run.more_exposures { "+" } else { "" },
        )
    }
}
