//! Lifecycle tests for SessionOrchestrator against scripted sessions.
//! No platform, no network: every session answer comes from a SessionScript.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use exposure_common::{
    DetectionError, ExposurePage, FailureKind, LastRunRecord, MatchingConfig, RunOutcome,
    SessionError, SubmissionError,
};
use exposure_session::testing::{
    exposure, keys, summary, RecordingObserver, ScriptedFactory, SessionLog, SessionScript,
};
use exposure_session::{
    CancelToken, MemoryRunRecorder, OrchestratorOptions, RunRecorder, SessionOrchestrator,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: SessionOrchestrator,
    log: Arc<SessionLog>,
    recorder: Arc<MemoryRunRecorder>,
}

fn harness(script: SessionScript) -> Harness {
    harness_with(script, OrchestratorOptions::default())
}

fn harness_with(script: SessionScript, options: OrchestratorOptions) -> Harness {
    let factory = ScriptedFactory::new(script);
    let log = factory.log();
    let recorder = Arc::new(MemoryRunRecorder::new());
    let orchestrator = SessionOrchestrator::new(Arc::new(factory), recorder.clone(), options);
    Harness {
        orchestrator,
        log,
        recorder,
    }
}

fn config() -> MatchingConfig {
    MatchingConfig {
        minimum_risk_score: 1,
        attenuation_level_values: vec![1, 2, 3, 4, 5, 6, 7, 8],
        days_since_last_exposure_level_values: vec![1; 8],
        duration_level_values: vec![1; 8],
        transmission_risk_level_values: vec![1; 8],
    }
}

fn started_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
}

fn failed_kind(observer: &RecordingObserver) -> FailureKind {
    match observer.terminal().as_slice() {
        [RunOutcome::Failed { kind, .. }] => *kind,
        other => panic!("expected exactly one failure notification, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ten_keys_at_capacity_four_submit_three_ordered_batches() {
    let h = harness(
        SessionScript::new(4)
            .deferred(Duration::from_millis(5))
            .finish_with(Ok(Some(summary(3)))),
    );
    let observer = RecordingObserver::new();

    let report = h
        .orchestrator
        .run(config(), keys(10), started_at(), &observer)
        .await
        .unwrap();

    assert_eq!(h.log.batches(), vec![4, 4, 2]);
    assert_eq!(h.log.overlapping_submissions(), 0);
    assert_eq!(report.submission.batches, 3);
    assert_eq!(report.submission.keys, 10);
    assert_eq!(report.summary, summary(3));
    assert_eq!(
        observer.outcomes(),
        vec![RunOutcome::Started, RunOutcome::Finished(summary(3))]
    );
    assert_eq!(h.log.activated_with(), vec![config()]);
    assert_eq!(h.log.invalidations(), 1);
    assert!(!h.orchestrator.is_running());
}

#[tokio::test]
async fn success_records_run_start_timestamp() {
    let h = harness(SessionScript::new(4));
    h.orchestrator
        .run(config(), keys(5), started_at(), &RecordingObserver::new())
        .await
        .unwrap();

    assert_eq!(h.recorder.writes(), 1);
    assert_eq!(
        h.recorder.last_success().await.unwrap(),
        Some(LastRunRecord::from(started_at()))
    );
}

#[tokio::test]
async fn zero_keys_submits_nothing_and_finishes() {
    let h = harness(SessionScript::new(4));
    let observer = RecordingObserver::new();

    let report = h
        .orchestrator
        .run(config(), Vec::new(), started_at(), &observer)
        .await
        .unwrap();

    assert!(h.log.batches().is_empty());
    assert_eq!(report.submission.batches, 0);
    assert_eq!(h.log.finishes(), 1);
    assert_eq!(observer.terminal(), vec![RunOutcome::Finished(summary(0))]);
    assert_eq!(h.recorder.writes(), 1);
}

#[tokio::test]
async fn batch_counts_follow_capacity_for_every_length() {
    for capacity in 1..6usize {
        for len in 0..17usize {
            let h = harness(SessionScript::new(capacity));
            h.orchestrator
                .run(config(), keys(len), started_at(), &RecordingObserver::new())
                .await
                .unwrap();

            let batches = h.log.batches();
            assert_eq!(batches.len(), len.div_ceil(capacity), "len={len} cap={capacity}");
            assert_eq!(batches.iter().sum::<usize>(), len);
            assert!(batches.iter().all(|b| *b <= capacity));
        }
    }
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_batch_stops_submission_and_fails_once() {
    let h = harness(
        SessionScript::new(4)
            .deferred(Duration::from_millis(2))
            .fail_batch(1, SessionError::Platform("malformed key file".into())),
    );
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run(config(), keys(10), started_at(), &observer)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DetectionError::Submission(SubmissionError::Rejected { batch: 1, .. })
    ));
    assert_eq!(h.log.batches(), vec![4, 4]);
    assert_eq!(h.log.finishes(), 0);
    assert_eq!(observer.started_count(), 1);
    assert_eq!(failed_kind(&observer), FailureKind::Submission);
    assert_eq!(h.recorder.writes(), 0);
    assert_eq!(h.log.invalidations(), 1);
}

#[tokio::test]
async fn activation_failure_submits_nothing() {
    let h = harness(SessionScript::new(4).fail_activation(SessionError::Platform("disabled".into())));
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run(config(), keys(10), started_at(), &observer)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Activation);
    assert!(h.log.batches().is_empty());
    assert_eq!(observer.outcomes()[0], RunOutcome::Started);
    assert_eq!(failed_kind(&observer), FailureKind::Activation);
    assert_eq!(h.recorder.writes(), 0);
    assert_eq!(h.log.invalidations(), 1);
}

#[tokio::test]
async fn finish_error_fails_run() {
    let h = harness(SessionScript::new(4).finish_with(Err(SessionError::Platform("rate limited".into()))));
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run(config(), keys(3), started_at(), &observer)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Finish);
    assert!(!err.is_fatal());
    assert_eq!(failed_kind(&observer), FailureKind::Finish);
    assert_eq!(h.recorder.writes(), 0);
}

#[tokio::test]
async fn missing_summary_is_an_invariant_violation() {
    let h = harness(SessionScript::new(4).finish_with(Ok(None)));
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run(config(), keys(3), started_at(), &observer)
        .await
        .unwrap_err();

    assert!(matches!(err, DetectionError::InvariantViolation(_)));
    assert!(err.is_fatal());
    assert_eq!(failed_kind(&observer), FailureKind::InvariantViolation);
    assert!(h.log.enumerations().is_empty());
    assert_eq!(h.recorder.writes(), 0);
}

#[tokio::test]
async fn zero_capacity_session_fails_submission() {
    let h = harness(SessionScript::new(0));
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run(config(), keys(3), started_at(), &observer)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DetectionError::Submission(SubmissionError::InvalidCapacity)
    ));
    assert!(h.log.batches().is_empty());
}

#[tokio::test]
async fn stalled_finish_times_out() {
    let h = harness_with(
        SessionScript::new(4).stall_finish(),
        OrchestratorOptions {
            callback_timeout: Some(Duration::from_millis(30)),
            ..OrchestratorOptions::default()
        },
    );
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run(config(), keys(3), started_at(), &observer)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DetectionError::Finish(SessionError::TimedOut(_))
    ));
    assert_eq!(failed_kind(&observer), FailureKind::Finish);
    assert!(!h.orchestrator.is_running());
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enumeration_failure_keeps_finished_outcome() {
    let h = harness(
        SessionScript::new(4)
            .finish_with(Ok(Some(summary(2))))
            .enumerate_with(Err(SessionError::Platform("not authorized".into()))),
    );
    let observer = RecordingObserver::new();

    let report = h
        .orchestrator
        .run(config(), keys(6), started_at(), &observer)
        .await
        .unwrap();

    assert!(report.exposures.is_empty());
    assert_eq!(observer.terminal(), vec![RunOutcome::Finished(summary(2))]);
    assert_eq!(h.log.enumerations(), vec![100]);
    assert_eq!(h.recorder.writes(), 1);
}

#[tokio::test]
async fn enumeration_page_is_bounded() {
    let page = ExposurePage {
        records: (1..=5).map(exposure).collect(),
        more: false,
    };
    let h = harness_with(
        SessionScript::new(4)
            .finish_with(Ok(Some(summary(5))))
            .enumerate_with(Ok(page)),
        OrchestratorOptions {
            enumeration_page_size: 3,
            ..OrchestratorOptions::default()
        },
    );

    let report = h
        .orchestrator
        .run(config(), keys(6), started_at(), &RecordingObserver::new())
        .await
        .unwrap();

    assert_eq!(h.log.enumerations(), vec![3]);
    assert_eq!(report.exposures.len(), 3);
    assert!(report.more_exposures);
}

#[tokio::test]
async fn stalled_enumeration_does_not_hold_back_the_outcome() {
    let h = harness_with(
        SessionScript::new(4)
            .finish_with(Ok(Some(summary(2))))
            .stall_enumeration(),
        OrchestratorOptions {
            enumeration_timeout: Duration::from_millis(50),
            ..OrchestratorOptions::default()
        },
    );
    let observer = RecordingObserver::new();

    let report = tokio::time::timeout(
        Duration::from_secs(2),
        h.orchestrator
            .run(config(), keys(6), started_at(), &observer),
    )
    .await
    .expect("run should return despite the stalled enumeration")
    .unwrap();

    assert!(report.exposures.is_empty());
    assert!(!report.more_exposures);
    assert_eq!(observer.terminal(), vec![RunOutcome::Finished(summary(2))]);
    assert_eq!(h.log.enumerations(), vec![100]);
    assert_eq!(h.recorder.writes(), 1);
    assert_eq!(h.log.invalidations(), 1);
    assert!(!h.orchestrator.is_running());
}

#[tokio::test]
async fn zero_page_size_skips_enumeration() {
    let h = harness_with(
        SessionScript::new(4),
        OrchestratorOptions {
            enumeration_page_size: 0,
            ..OrchestratorOptions::default()
        },
    );
    h.orchestrator
        .run(config(), keys(2), started_at(), &RecordingObserver::new())
        .await
        .unwrap();
    assert!(h.log.enumerations().is_empty());
}

// ---------------------------------------------------------------------------
// Concurrency, cancellation, observers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_run_while_busy_is_rejected_without_notifications() {
    let h = harness(SessionScript::new(2).deferred(Duration::from_millis(20)));
    let first_observer = RecordingObserver::new();
    let second_observer = RecordingObserver::new();

    let (first, second) = tokio::join!(
        h.orchestrator
            .run(config(), keys(4), started_at(), &first_observer),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            h.orchestrator
                .run(config(), keys(4), started_at(), &second_observer)
                .await
        }
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(DetectionError::Busy)));
    assert!(second_observer.outcomes().is_empty());
    assert_eq!(h.log.sessions_created(), 1);

    // Guard released: the next run is accepted.
    h.orchestrator
        .run(config(), keys(4), started_at(), &RecordingObserver::new())
        .await
        .unwrap();
    assert_eq!(h.log.sessions_created(), 2);
}

#[tokio::test]
async fn claimed_slot_rejects_runs_until_used() {
    let h = harness(SessionScript::new(4));
    let observer = RecordingObserver::new();

    let permit = h.orchestrator.try_begin().unwrap();
    assert!(h.orchestrator.is_running());
    assert!(matches!(h.orchestrator.try_begin(), Err(DetectionError::Busy)));
    assert!(matches!(
        h.orchestrator
            .run(config(), keys(2), started_at(), &observer)
            .await,
        Err(DetectionError::Busy)
    ));
    assert!(observer.outcomes().is_empty());

    let report = h
        .orchestrator
        .run_with_permit(permit, config(), keys(2), started_at(), &observer, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.submission.keys, 2);
    assert_eq!(observer.started_count(), 1);
    assert!(!h.orchestrator.is_running());
}

#[tokio::test]
async fn abandoned_run_keeps_slot_until_session_is_torn_down() {
    let h = harness(SessionScript::new(1).deferred(Duration::from_millis(30)));
    let observer = RecordingObserver::new();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        h.orchestrator
            .run(config(), keys(20), started_at(), &observer),
    )
    .await;
    assert!(abandoned.is_err());

    // The batch worker is still waiting on an acknowledgment.
    assert!(h.orchestrator.is_running());
    assert!(matches!(
        h.orchestrator
            .run(config(), keys(1), started_at(), &RecordingObserver::new())
            .await,
        Err(DetectionError::Busy)
    ));

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.orchestrator.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run slot should be released once the worker stops");

    let submitted = h.log.batches().len();
    assert!(submitted < 20, "submission continued after abandon: {submitted} batches");
    assert_eq!(h.log.invalidations(), 1);
    assert_eq!(h.recorder.writes(), 0);
    assert!(observer.terminal().is_empty());

    h.orchestrator
        .run(config(), keys(3), started_at(), &RecordingObserver::new())
        .await
        .unwrap();
    assert_eq!(h.log.batches().len(), submitted + 3);
    assert_eq!(h.log.overlapping_submissions(), 0);
    assert_eq!(h.log.invalidations(), 2);
}

#[tokio::test]
async fn cancel_between_batches_stops_submission() {
    let cancel = CancelToken::new();
    let h = harness(SessionScript::new(2).cancel_after_batch(0, cancel.clone()));
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run_cancellable(config(), keys(6), started_at(), &observer, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DetectionError::Submission(SubmissionError::Cancelled { batch: 1 })
    ));
    assert_eq!(h.log.batches(), vec![2]);
    assert_eq!(failed_kind(&observer), FailureKind::Cancelled);
    assert_eq!(h.recorder.writes(), 0);
}

#[tokio::test]
async fn cancelled_before_start_creates_no_session() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let h = harness(SessionScript::new(2));
    let observer = RecordingObserver::new();

    let err = h
        .orchestrator
        .run_cancellable(config(), keys(6), started_at(), &observer, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert_eq!(h.log.sessions_created(), 0);
    assert!(observer.outcomes().is_empty());
}

#[tokio::test]
async fn failing_observer_does_not_change_outcome() {
    let h = harness(SessionScript::new(4).finish_with(Ok(Some(summary(1)))));
    let observer = RecordingObserver::failing();

    let report = h
        .orchestrator
        .run(config(), keys(4), started_at(), &observer)
        .await
        .unwrap();

    assert_eq!(report.summary, summary(1));
    assert_eq!(
        observer.outcomes(),
        vec![RunOutcome::Started, RunOutcome::Finished(summary(1))]
    );
    assert_eq!(h.recorder.writes(), 1);
}
