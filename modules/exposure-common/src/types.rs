use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

// --- Keys & configuration ---------------------------------------------------

/// A diagnosis key published by the key server.
///
/// Opaque to the orchestration layer: only the count of keys and the session's
/// batch capacity matter once keys have been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisKey {
    pub key_data: Vec<u8>,
    pub rolling_start_number: u32,
    pub rolling_period: u32,
    pub transmission_risk_level: u8,
}

impl DiagnosisKey {
    pub fn new(key_data: Vec<u8>, rolling_start_number: u32) -> Self {
        Self {
            key_data,
            rolling_start_number,
            rolling_period: 144,
            transmission_risk_level: 0,
        }
    }
}

/// Exposure configuration forwarded to the platform on session activation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub minimum_risk_score: u8,
    pub attenuation_level_values: Vec<u8>,
    pub days_since_last_exposure_level_values: Vec<u8>,
    pub duration_level_values: Vec<u8>,
    pub transmission_risk_level_values: Vec<u8>,
}

// --- Platform results -------------------------------------------------------

/// Summary produced by a finished matching session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureSummary {
    pub days_since_last_exposure: u32,
    pub matched_key_count: u64,
    pub maximum_risk_score: u8,
    /// Seconds spent in each attenuation bucket.
    pub attenuation_durations: Vec<u32>,
}

impl ExposureSummary {
    pub fn has_exposure(&self) -> bool {
        self.matched_key_count > 0
    }
}

impl fmt::Display for ExposureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "matched_keys={} days_since_last_exposure={} max_risk_score={}",
            self.matched_key_count, self.days_since_last_exposure, self.maximum_risk_score,
        )
    }
}

/// A single exposure returned by session enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub date: DateTime<Utc>,
    pub duration_secs: u32,
    pub attenuation_value: u8,
    pub total_risk_score: u8,
    pub transmission_risk_level: u8,
}

/// One page of enumerated exposures. `more` is set when the session holds
/// records beyond the requested page size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposurePage {
    pub records: Vec<ExposureRecord>,
    pub more: bool,
}

// --- Run bookkeeping --------------------------------------------------------

/// The key retrieval window for one run. Invariant: `start <= now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWindow {
    pub start: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl RunWindow {
    pub fn length(&self) -> Duration {
        self.now - self.start
    }
}

impl fmt::Display for RunWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%dT%H:%M:%S"),
            self.now.format("%Y-%m-%dT%H:%M:%S"),
        )
    }
}

/// Timestamp of the last fully successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRunRecord {
    pub timestamp: DateTime<Utc>,
}

impl From<DateTime<Utc>> for LastRunRecord {
    fn from(timestamp: DateTime<Utc>) -> Self {
        Self { timestamp }
    }
}

/// Notifications a run delivers to its observer, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Started,
    Finished(ExposureSummary),
    Failed { kind: FailureKind, message: String },
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}
