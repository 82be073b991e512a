//! The detection run state machine.
//!
//! Idle → Activating → Submitting → Finishing → {Finished, Failed}
//!
//! Activation, finish, and enumeration are awaited on the calling task; the
//! batch loop runs on a blocking worker. Every accepted run delivers
//! `on_started` once and then exactly one terminal notification, unless the
//! caller drops the run future first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use exposure_common::{
    DetectionConfig, DetectionError, DiagnosisKey, ExposurePage, ExposureRecord, ExposureSummary,
    MatchingConfig, RunStage, SubmissionError,
};

use crate::batch::{BatchSubmitter, SubmissionStats};
use crate::cancel::CancelToken;
use crate::completion::Completion;
use crate::observer::RunObserver;
use crate::recorder::RunRecorder;
use crate::traits::{MatchingSession, SessionFactory};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Records requested from post-run enumeration. Zero disables enumeration.
    pub enumeration_page_size: usize,
    /// Bound on every platform callback; `None` waits indefinitely.
    pub callback_timeout: Option<Duration>,
    /// Bound on the enumeration callback even when `callback_timeout` is unset.
    pub enumeration_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            enumeration_page_size: exposure_common::config::DEFAULT_ENUMERATION_PAGE_SIZE,
            callback_timeout: None,
            enumeration_timeout: Duration::from_secs(
                exposure_common::config::DEFAULT_ENUMERATION_TIMEOUT_SECS,
            ),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            enumeration_page_size: config.enumeration_page_size,
            callback_timeout: config.callback_timeout,
            enumeration_timeout: config.enumeration_timeout,
        }
    }

    fn enumeration_wait(&self) -> Duration {
        match self.callback_timeout {
            Some(limit) => limit.min(self.enumeration_timeout),
            None => self.enumeration_timeout,
        }
    }
}

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submission: SubmissionStats,
    pub summary: ExposureSummary,
    /// Best-effort; empty when enumeration failed or was disabled.
    pub exposures: Vec<ExposureRecord>,
    pub more_exposures: bool,
}

pub struct SessionOrchestrator {
    factory: Arc<dyn SessionFactory>,
    recorder: Arc<dyn RunRecorder>,
    options: OrchestratorOptions,
    busy: Arc<AtomicBool>,
}

impl SessionOrchestrator {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        recorder: Arc<dyn RunRecorder>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            factory,
            recorder,
            options,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the single run slot ahead of any pre-run work.
    ///
    /// The orchestrator stays busy until the returned permit is dropped, or,
    /// once a run has started with it, until that run's session is invalidated.
    pub fn try_begin(&self) -> Result<RunPermit, DetectionError> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(RunPermit {
                busy: Arc::clone(&self.busy),
            }),
            Err(_) => {
                warn!("Detection run requested while another is in flight");
                Err(DetectionError::Busy)
            }
        }
    }

    /// Run one detection with the given configuration and keys.
    ///
    /// `started_at` is what gets recorded as the last successful run.
    pub async fn run(
        &self,
        config: MatchingConfig,
        keys: Vec<DiagnosisKey>,
        started_at: DateTime<Utc>,
        observer: &dyn RunObserver,
    ) -> Result<RunReport, DetectionError> {
        self.run_cancellable(config, keys, started_at, observer, &CancelToken::new())
            .await
    }

    /// Like [`run`](Self::run), checking `cancel` between batches and before
    /// each lifecycle transition.
    ///
    /// Returns `Busy` without notifying the observer if a run is already in
    /// flight, and `Cancelled` without notifying if cancelled before starting.
    pub async fn run_cancellable(
        &self,
        config: MatchingConfig,
        keys: Vec<DiagnosisKey>,
        started_at: DateTime<Utc>,
        observer: &dyn RunObserver,
        cancel: &CancelToken,
    ) -> Result<RunReport, DetectionError> {
        let permit = self.try_begin()?;
        self.run_with_permit(permit, config, keys, started_at, observer, cancel)
            .await
    }

    /// Run one detection in a slot already claimed with [`try_begin`](Self::try_begin).
    ///
    /// Dropping the returned future part-way cancels the run. Batch submission
    /// stops at the next chunk boundary, the session is invalidated once it is
    /// no longer in use, and only then is the slot released. No terminal
    /// notification is delivered for an abandoned run.
    pub async fn run_with_permit(
        &self,
        permit: RunPermit,
        config: MatchingConfig,
        keys: Vec<DiagnosisKey>,
        started_at: DateTime<Utc>,
        observer: &dyn RunObserver,
        cancel: &CancelToken,
    ) -> Result<RunReport, DetectionError> {
        debug_assert!(
            Arc::ptr_eq(&permit.busy, &self.busy),
            "run permit belongs to another orchestrator"
        );

        let mut lifecycle = Lifecycle::new(Uuid::new_v4());
        let run_cancel = cancel.child();
        if run_cancel.is_cancelled() {
            return Err(DetectionError::Cancelled {
                stage: lifecycle.stage,
            });
        }

        info!(
            run_id = %lifecycle.run_id,
            keys = keys.len(),
            started_at = %started_at.format("%Y-%m-%dT%H:%M:%S"),
            "Detection run starting"
        );
        if let Err(e) = observer.on_started().await {
            warn!(error = %e, "Observer failed to handle run start");
        }

        lifecycle.advance(RunStage::Activating);
        let active = Arc::new(ActiveSession {
            run_id: lifecycle.run_id,
            session: self.factory.create(),
            invalidated: AtomicBool::new(false),
            _permit: permit,
        });
        let _abandon = CancelOnDrop(run_cancel.clone());

        let result = self
            .drive(&mut lifecycle, &active, &config, keys, &run_cancel)
            .await;

        match result {
            Err(err) => {
                lifecycle.advance(RunStage::Failed);
                warn!(
                    run_id = %lifecycle.run_id,
                    kind = %err.kind(),
                    fatal = err.is_fatal(),
                    error = %err,
                    "Detection run failed"
                );
                active.invalidate();
                if let Err(e) = observer.on_failed(&err).await {
                    warn!(error = %e, "Observer failed to handle run failure");
                }
                Err(err)
            }
            Ok((submission, summary)) => {
                lifecycle.advance(RunStage::Finished);
                info!(
                    run_id = %lifecycle.run_id,
                    batches = submission.batches,
                    keys = submission.keys,
                    "Detection run finished. {summary}"
                );
                if let Err(e) = observer.on_finished(&summary).await {
                    warn!(error = %e, "Observer failed to handle run completion");
                }

                if let Err(e) = self.recorder.record_success(started_at).await {
                    warn!(run_id = %lifecycle.run_id, error = %e, "Failed to record successful run");
                }

                let page = self.enumerate_exposures(lifecycle.run_id, active.session()).await;
                active.invalidate();

                Ok(RunReport {
                    run_id: lifecycle.run_id,
                    started_at,
                    submission,
                    summary,
                    exposures: page.records,
                    more_exposures: page.more,
                })
            }
        }
    }

    async fn drive(
        &self,
        lifecycle: &mut Lifecycle,
        active: &Arc<ActiveSession>,
        config: &MatchingConfig,
        keys: Vec<DiagnosisKey>,
        cancel: &CancelToken,
    ) -> Result<(SubmissionStats, ExposureSummary), DetectionError> {
        let timeout = self.options.callback_timeout;

        // Activating
        let (done, pending) = Completion::pending();
        active.session().activate(config, done);
        pending.wait(timeout).await.map_err(DetectionError::Activation)?;

        checkpoint(cancel, lifecycle.stage)?;
        lifecycle.advance(RunStage::Submitting);

        // Submitting: the worker keeps the session (and with it the run slot)
        // alive until its loop returns, even if this future is dropped.
        let submitter = BatchSubmitter::new(timeout);
        let worker_session = Arc::clone(active);
        let worker_cancel = cancel.clone();
        let submission = tokio::task::spawn_blocking(move || {
            submitter.submit(worker_session.session(), &keys, &worker_cancel)
        })
        .await
        .map_err(|e| SubmissionError::Worker(e.to_string()))??;

        checkpoint(cancel, lifecycle.stage)?;
        lifecycle.advance(RunStage::Finishing);

        // Finishing
        let (done, pending) = Completion::pending();
        active.session().finish(done);
        let summary = pending
            .wait(timeout)
            .await
            .map_err(DetectionError::Finish)?
            .ok_or_else(|| {
                DetectionError::InvariantViolation(
                    "session finished without a summary or an error".to_string(),
                )
            })?;

        Ok((submission, summary))
    }

    /// Best-effort enumeration after a finished run. Never fails the run and
    /// never waits longer than the enumeration timeout.
    async fn enumerate_exposures(&self, run_id: Uuid, session: &dyn MatchingSession) -> ExposurePage {
        let page_size = self.options.enumeration_page_size;
        if page_size == 0 {
            return ExposurePage::default();
        }

        let (done, pending) = Completion::pending();
        session.enumerate(page_size, done);
        match pending.wait(Some(self.options.enumeration_wait())).await {
            Ok(mut page) => {
                if page.records.len() > page_size {
                    page.records.truncate(page_size);
                    page.more = true;
                }
                info!(%run_id, records = page.records.len(), more = page.more, "Enumerated exposures");
                page
            }
            Err(cause) => {
                let err = DetectionError::Enumeration(cause);
                warn!(%run_id, error = %err, "Ignoring enumeration failure");
                ExposurePage::default()
            }
        }
    }
}

fn checkpoint(cancel: &CancelToken, stage: RunStage) -> Result<(), DetectionError> {
    if cancel.is_cancelled() {
        return Err(DetectionError::Cancelled { stage });
    }
    Ok(())
}

/// Tracks the current stage of one run and logs each transition.
struct Lifecycle {
    run_id: Uuid,
    stage: RunStage,
}

impl Lifecycle {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            stage: RunStage::Idle,
        }
    }

    fn advance(&mut self, next: RunStage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal run transition {} -> {}",
            self.stage,
            next
        );
        info!(run_id = %self.run_id, from = %self.stage, to = %next, "Run stage transition");
        self.stage = next;
    }
}

/// Exclusive claim on an orchestrator's single run slot, released on drop.
#[derive(Debug)]
pub struct RunPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// The session driven by one run, shared between the driver and the batch
/// worker. Invalidated exactly once: explicitly when the run ends, or on drop
/// of the last handle when the run was abandoned. The permit is released
/// after invalidation.
struct ActiveSession {
    run_id: Uuid,
    session: Box<dyn MatchingSession>,
    invalidated: AtomicBool,
    _permit: RunPermit,
}

impl ActiveSession {
    fn session(&self) -> &dyn MatchingSession {
        self.session.as_ref()
    }

    fn invalidate(&self) {
        if !self.invalidated.swap(true, Ordering::AcqRel) {
            self.session.invalidate();
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if !self.invalidated.load(Ordering::Acquire) {
            warn!(run_id = %self.run_id, "Detection run abandoned, invalidating session");
            self.invalidate();
        }
    }
}

/// Cancels the run-local token when the run future goes away.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
