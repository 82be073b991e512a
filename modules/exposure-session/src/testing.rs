// Test doubles for the session boundary.
//
// - ScriptedFactory / ScriptedSession (SessionFactory / MatchingSession):
//   scripted outcomes per operation, inline or deferred callback delivery,
//   and a shared SessionLog for assertions
// - RecordingObserver (RunObserver): records every notification in order
//
// Plus helpers for building keys, summaries, and exposure records.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use exposure_common::{
    DetectionError, DiagnosisKey, ExposurePage, ExposureRecord, ExposureSummary, MatchingConfig,
    RunOutcome, SessionError,
};

use crate::cancel::CancelToken;
use crate::completion::Completion;
use crate::observer::RunObserver;
use crate::traits::{MatchingSession, SessionFactory};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `n` distinct keys in submission order.
pub fn keys(n: usize) -> Vec<DiagnosisKey> {
    (0..n)
        .map(|i| DiagnosisKey::new((i as u32).to_be_bytes().repeat(4), 2_800_000 + i as u32))
        .collect()
}

pub fn summary(matched_key_count: u64) -> ExposureSummary {
    ExposureSummary {
        days_since_last_exposure: if matched_key_count > 0 { 2 } else { 0 },
        matched_key_count,
        maximum_risk_score: if matched_key_count > 0 { 6 } else { 0 },
        attenuation_durations: vec![900, 300, 0],
    }
}

pub fn exposure(day: u32) -> ExposureRecord {
    ExposureRecord {
        date: Utc.with_ymd_and_hms(2026, 3, day, 0, 0, 0).unwrap(),
        duration_secs: 900,
        attenuation_value: 40,
        total_risk_score: 6,
        transmission_risk_level: 4,
    }
}

// ---------------------------------------------------------------------------
// SessionScript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Delivery {
    /// Complete inside the session call.
    Inline,
    /// Complete from a separate thread after a delay.
    Deferred(Duration),
}

/// What each session operation answers. Builder pattern: `.fail_batch()`,
/// `.finish_with()`, `.enumerate_with()`, ...
#[derive(Clone)]
pub struct SessionScript {
    capacity: usize,
    delivery: Delivery,
    activation: Result<(), SessionError>,
    fail_batch: Option<(usize, SessionError)>,
    finish: Result<Option<ExposureSummary>, SessionError>,
    stall_finish: bool,
    enumeration: Result<ExposurePage, SessionError>,
    stall_enumeration: bool,
    cancel_after_batch: Option<(usize, CancelToken)>,
}

impl SessionScript {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            delivery: Delivery::Inline,
            activation: Ok(()),
            fail_batch: None,
            finish: Ok(Some(summary(0))),
            stall_finish: false,
            enumeration: Ok(ExposurePage::default()),
            stall_enumeration: false,
            cancel_after_batch: None,
        }
    }

    pub fn deferred(mut self, delay: Duration) -> Self {
        self.delivery = Delivery::Deferred(delay);
        self
    }

    pub fn fail_activation(mut self, error: SessionError) -> Self {
        self.activation = Err(error);
        self
    }

    pub fn fail_batch(mut self, batch: usize, error: SessionError) -> Self {
        self.fail_batch = Some((batch, error));
        self
    }

    pub fn finish_with(mut self, finish: Result<Option<ExposureSummary>, SessionError>) -> Self {
        self.finish = finish;
        self
    }

    /// Hold the finish completion without ever invoking it.
    pub fn stall_finish(mut self) -> Self {
        self.stall_finish = true;
        self
    }

    pub fn enumerate_with(mut self, enumeration: Result<ExposurePage, SessionError>) -> Self {
        self.enumeration = enumeration;
        self
    }

    /// Hold the enumerate completion without ever invoking it.
    pub fn stall_enumeration(mut self) -> Self {
        self.stall_enumeration = true;
        self
    }

    /// Cancel `token` as soon as batch `batch` is acknowledged.
    pub fn cancel_after_batch(mut self, batch: usize, token: CancelToken) -> Self {
        self.cancel_after_batch = Some((batch, token));
        self
    }
}

// ---------------------------------------------------------------------------
// SessionLog
// ---------------------------------------------------------------------------

/// Shared record of every call made against scripted sessions.
#[derive(Default)]
pub struct SessionLog {
    sessions_created: AtomicUsize,
    activations: AtomicUsize,
    activated_with: Mutex<Vec<MatchingConfig>>,
    batches: Mutex<Vec<usize>>,
    in_flight: AtomicBool,
    overlapping_submissions: AtomicUsize,
    finishes: AtomicUsize,
    enumerations: Mutex<Vec<usize>>,
    invalidations: AtomicUsize,
    stalled: Mutex<Vec<Completion<Option<ExposureSummary>>>>,
    stalled_pages: Mutex<Vec<Completion<ExposurePage>>>,
}

impl SessionLog {
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn activated_with(&self) -> Vec<MatchingConfig> {
        self.activated_with.lock().unwrap().clone()
    }

    /// Sizes of every submitted batch, in submission order.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    /// Submissions issued while a previous batch was still unacknowledged.
    pub fn overlapping_submissions(&self) -> usize {
        self.overlapping_submissions.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }

    /// Requested page size of every enumeration call.
    pub fn enumerations(&self) -> Vec<usize> {
        self.enumerations.lock().unwrap().clone()
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// ScriptedSession
// ---------------------------------------------------------------------------

pub struct ScriptedSession {
    script: SessionScript,
    log: Arc<SessionLog>,
}

impl ScriptedSession {
    pub fn new(script: SessionScript, log: Arc<SessionLog>) -> Self {
        Self { script, log }
    }

    fn deliver<T, F>(&self, done: Completion<T>, result: Result<T, SessionError>, before: F)
    where
        T: Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        match self.script.delivery {
            Delivery::Inline => {
                before();
                done.complete(result);
            }
            Delivery::Deferred(delay) => {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    before();
                    done.complete(result);
                });
            }
        }
    }
}

impl MatchingSession for ScriptedSession {
    fn maximum_key_count(&self) -> usize {
        self.script.capacity
    }

    fn activate(&self, config: &MatchingConfig, done: Completion<()>) {
        self.log.activations.fetch_add(1, Ordering::SeqCst);
        self.log.activated_with.lock().unwrap().push(config.clone());
        self.deliver(done, self.script.activation.clone(), || {});
    }

    fn submit_batch(&self, keys: &[DiagnosisKey], done: Completion<()>) {
        if self.log.in_flight.swap(true, Ordering::SeqCst) {
            self.log.overlapping_submissions.fetch_add(1, Ordering::SeqCst);
        }
        let batch = {
            let mut batches = self.log.batches.lock().unwrap();
            batches.push(keys.len());
            batches.len() - 1
        };

        let result = match &self.script.fail_batch {
            Some((failing, error)) if *failing == batch => Err(error.clone()),
            _ => Ok(()),
        };
        let cancel = self
            .script
            .cancel_after_batch
            .as_ref()
            .filter(|(after, _)| *after == batch)
            .map(|(_, token)| token.clone());

        let log = Arc::clone(&self.log);
        self.deliver(done, result, move || {
            log.in_flight.store(false, Ordering::SeqCst);
            if let Some(token) = cancel {
                token.cancel();
            }
        });
    }

    fn finish(&self, done: Completion<Option<ExposureSummary>>) {
        self.log.finishes.fetch_add(1, Ordering::SeqCst);
        if self.script.stall_finish {
            self.log.stalled.lock().unwrap().push(done);
            return;
        }
        self.deliver(done, self.script.finish.clone(), || {});
    }

    fn enumerate(&self, max_count: usize, done: Completion<ExposurePage>) {
        self.log.enumerations.lock().unwrap().push(max_count);
        if self.script.stall_enumeration {
            self.log.stalled_pages.lock().unwrap().push(done);
            return;
        }
        self.deliver(done, self.script.enumeration.clone(), || {});
    }

    fn invalidate(&self) {
        self.log.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// ScriptedFactory
// ---------------------------------------------------------------------------

pub struct ScriptedFactory {
    script: SessionScript,
    log: Arc<SessionLog>,
}

impl ScriptedFactory {
    pub fn new(script: SessionScript) -> Self {
        Self {
            script,
            log: Arc::new(SessionLog::default()),
        }
    }

    pub fn log(&self) -> Arc<SessionLog> {
        Arc::clone(&self.log)
    }
}

impl SessionFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn MatchingSession> {
        self.log.sessions_created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedSession::new(self.script.clone(), Arc::clone(&self.log)))
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver
// ---------------------------------------------------------------------------

/// Records notifications in delivery order. `failing()` additionally returns
/// an error from every notification.
#[derive(Default)]
pub struct RecordingObserver {
    outcomes: Mutex<Vec<RunOutcome>>,
    fail: bool,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn outcomes(&self) -> Vec<RunOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn started_count(&self) -> usize {
        self.outcomes()
            .iter()
            .filter(|o| matches!(o, RunOutcome::Started))
            .count()
    }

    pub fn terminal(&self) -> Vec<RunOutcome> {
        self.outcomes()
            .into_iter()
            .filter(RunOutcome::is_terminal)
            .collect()
    }

    fn push(&self, outcome: RunOutcome) -> anyhow::Result<()> {
        self.outcomes.lock().unwrap().push(outcome);
        if self.fail {
            anyhow::bail!("RecordingObserver: scripted notification failure");
        }
        Ok(())
    }
}

#[async_trait]
impl RunObserver for RecordingObserver {
    async fn on_started(&self) -> anyhow::Result<()> {
        self.push(RunOutcome::Started)
    }

    async fn on_finished(&self, summary: &ExposureSummary) -> anyhow::Result<()> {
        self.push(RunOutcome::Finished(summary.clone()))
    }

    async fn on_failed(&self, error: &DetectionError) -> anyhow::Result<()> {
        self.push(RunOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        })
    }
}
