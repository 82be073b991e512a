//! Lookback window selection and the one-run-per-interval gate.

use chrono::{DateTime, Duration, Utc};

use exposure_common::{DetectionConfig, DetectionError, LastRunRecord, RunWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub lookback: Duration,
    pub min_interval: Duration,
    /// When false, `gate` always passes and `should_run` is advisory.
    pub enforce_throttle: bool,
    /// Start the window at the last successful run when it falls inside the lookback.
    pub incremental: bool,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            lookback: Duration::days(exposure_common::config::DEFAULT_LOOKBACK_DAYS),
            min_interval: Duration::minutes(exposure_common::config::DEFAULT_MIN_INTERVAL_MINUTES),
            enforce_throttle: true,
            incremental: true,
        }
    }
}

impl WindowPolicy {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            lookback: config.lookback(),
            min_interval: config.min_interval(),
            enforce_throttle: config.enforce_throttle,
            incremental: config.incremental_window,
        }
    }

    /// Compute the key retrieval window for a run starting at `now`.
    ///
    /// A last run recorded in the future (clock skew) is ignored. A lookback
    /// reaching past the representable range starts at the earliest instant.
    pub fn select_window(&self, last_run: Option<&LastRunRecord>, now: DateTime<Utc>) -> RunWindow {
        let floor = now
            .checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let start = match last_run.map(|r| r.timestamp) {
            Some(ts) if self.incremental && ts <= now => ts.max(floor),
            _ => floor,
        };
        RunWindow { start, now }
    }

    /// True iff there is no usable prior run or more than `min_interval` has
    /// elapsed since it.
    pub fn should_run(&self, last_run: Option<&LastRunRecord>, now: DateTime<Utc>) -> bool {
        match last_run.map(|r| r.timestamp) {
            None => true,
            Some(ts) if ts > now => true,
            Some(ts) => now - ts > self.min_interval,
        }
    }

    /// Earliest instant at which `should_run` turns true, if a prior run exists.
    pub fn next_eligible(&self, last_run: Option<&LastRunRecord>) -> Option<DateTime<Utc>> {
        last_run.map(|r| self.eligible_after(r.timestamp))
    }

    fn eligible_after(&self, last_run: DateTime<Utc>) -> DateTime<Utc> {
        last_run
            .checked_add_signed(self.min_interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Enforce `should_run` when the throttle is enabled.
    pub fn gate(&self, last_run: Option<&LastRunRecord>, now: DateTime<Utc>) -> Result<(), DetectionError> {
        if !self.enforce_throttle || self.should_run(last_run, now) {
            return Ok(());
        }
        match last_run {
            Some(record) => Err(DetectionError::Throttled {
                last_run: record.timestamp,
                next_eligible: self.eligible_after(record.timestamp),
            }),
            None => Ok(()),
        }
    }
}
