use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use tracing::info;

use crate::error::DetectionError;

/// Default key lookback when no prior run narrows the window.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 14;
/// Default minimum spacing between two detection runs.
pub const DEFAULT_MIN_INTERVAL_MINUTES: i64 = 60;
/// Default page size for post-run exposure enumeration.
pub const DEFAULT_ENUMERATION_PAGE_SIZE: usize = 100;
/// Default bound on the post-run enumeration callback.
pub const DEFAULT_ENUMERATION_TIMEOUT_SECS: u64 = 30;

/// Largest accepted lookback. Keys older than this are never retained anyway.
pub const MAX_LOOKBACK_DAYS: i64 = 3_650;
/// Largest accepted run spacing (one year).
pub const MAX_MIN_INTERVAL_MINUTES: i64 = 525_600;

/// Detection policy loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub lookback_days: i64,
    pub min_interval_minutes: i64,
    /// When false the one-run-per-interval gate is advisory only.
    pub enforce_throttle: bool,
    /// Shrink the window to the last successful run when it is inside the lookback.
    pub incremental_window: bool,
    pub enumeration_page_size: usize,
    /// Upper bound on each platform callback. `None` waits indefinitely.
    pub callback_timeout: Option<std::time::Duration>,
    /// Upper bound on the enumeration callback, applied even without `callback_timeout`.
    pub enumeration_timeout: std::time::Duration,
    pub data_dir: PathBuf,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            min_interval_minutes: DEFAULT_MIN_INTERVAL_MINUTES,
            enforce_throttle: true,
            incremental_window: true,
            enumeration_page_size: DEFAULT_ENUMERATION_PAGE_SIZE,
            callback_timeout: None,
            enumeration_timeout: std::time::Duration::from_secs(DEFAULT_ENUMERATION_TIMEOUT_SECS),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl DetectionConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Env vars:
    /// - `EXPOSURE_LOOKBACK_DAYS`
    /// - `EXPOSURE_MIN_INTERVAL_MINUTES`
    /// - `EXPOSURE_ENFORCE_THROTTLE` (`true`/`false`/`1`/`0`)
    /// - `EXPOSURE_INCREMENTAL_WINDOW`
    /// - `EXPOSURE_ENUMERATION_PAGE_SIZE`
    /// - `EXPOSURE_CALLBACK_TIMEOUT_SECS`
    /// - `EXPOSURE_ENUMERATION_TIMEOUT_SECS`
    /// - `DATA_DIR`
    pub fn from_env() -> Result<Self, DetectionError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, DetectionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let lookback_days =
            parse_var(&lookup, "EXPOSURE_LOOKBACK_DAYS")?.unwrap_or(defaults.lookback_days);
        if !(1..=MAX_LOOKBACK_DAYS).contains(&lookback_days) {
            return Err(DetectionError::Config(format!(
                "EXPOSURE_LOOKBACK_DAYS must be between 1 and {MAX_LOOKBACK_DAYS}, got {lookback_days}"
            )));
        }

        let min_interval_minutes = parse_var(&lookup, "EXPOSURE_MIN_INTERVAL_MINUTES")?
            .unwrap_or(defaults.min_interval_minutes);
        if !(0..=MAX_MIN_INTERVAL_MINUTES).contains(&min_interval_minutes) {
            return Err(DetectionError::Config(format!(
                "EXPOSURE_MIN_INTERVAL_MINUTES must be between 0 and {MAX_MIN_INTERVAL_MINUTES}, got {min_interval_minutes}"
            )));
        }

        let enumeration_page_size = parse_var(&lookup, "EXPOSURE_ENUMERATION_PAGE_SIZE")?
            .unwrap_or(defaults.enumeration_page_size);

        let callback_timeout = parse_var::<u64, _>(&lookup, "EXPOSURE_CALLBACK_TIMEOUT_SECS")?
            .map(std::time::Duration::from_secs);

        let enumeration_timeout = parse_var::<u64, _>(&lookup, "EXPOSURE_ENUMERATION_TIMEOUT_SECS")?
            .map(std::time::Duration::from_secs)
            .unwrap_or(defaults.enumeration_timeout);

        Ok(Self {
            lookback_days,
            min_interval_minutes,
            enforce_throttle: parse_flag(&lookup, "EXPOSURE_ENFORCE_THROTTLE")?
                .unwrap_or(defaults.enforce_throttle),
            incremental_window: parse_flag(&lookup, "EXPOSURE_INCREMENTAL_WINDOW")?
                .unwrap_or(defaults.incremental_window),
            enumeration_page_size,
            callback_timeout,
            enumeration_timeout,
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        })
    }

    /// Clamped to the accepted range for configs built without `from_vars`.
    pub fn lookback(&self) -> Duration {
        Duration::days(self.lookback_days.clamp(1, MAX_LOOKBACK_DAYS))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::minutes(self.min_interval_minutes.clamp(0, MAX_MIN_INTERVAL_MINUTES))
    }

    /// Where the file-backed run recorder keeps its state.
    pub fn last_run_path(&self) -> PathBuf {
        self.data_dir.join("exposure").join("last-run.json")
    }

    /// Log the effective configuration.
    pub fn log_summary(&self) {
        info!(
            lookback_days = self.lookback_days,
            min_interval_minutes = self.min_interval_minutes,
            enforce_throttle = self.enforce_throttle,
            incremental_window = self.incremental_window,
            enumeration_page_size = self.enumeration_page_size,
            callback_timeout_secs = self.callback_timeout.map(|t| t.as_secs()),
            enumeration_timeout_secs = self.enumeration_timeout.as_secs(),
            data_dir = %self.data_dir.display(),
            "Exposure detection config loaded"
        );
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, DetectionError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DetectionError::Config(format!("{key} must be a number, got {raw:?}"))),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>, DetectionError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(None),
        Some("1" | "true" | "TRUE" | "yes") => Ok(Some(true)),
        Some("0" | "false" | "FALSE" | "no") => Ok(Some(false)),
        Some(other) => Err(DetectionError::Config(format!(
            "{key} must be true or false, got {other:?}"
        ))),
    }
}
