use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use exposure_common::{DetectionConfig, DetectionError};
use exposure_session::{
    CancelToken, FileRunRecorder, OrchestratorOptions, RunObserver, RunRecorder, SessionFactory,
    SessionOrchestrator, WindowPolicy,
};

use crate::sources::{ConfigSource, KeySource};
use crate::types::DetectionReport;

/// Collaborators for an [`ExposureDetector`].
#[derive(Clone, TypedBuilder)]
pub struct DetectorDeps {
    pub config_source: Arc<dyn ConfigSource>,
    pub key_source: Arc<dyn KeySource>,
    pub session_factory: Arc<dyn SessionFactory>,
    pub recorder: Arc<dyn RunRecorder>,
    #[builder(default)]
    pub policy: WindowPolicy,
    #[builder(default)]
    pub options: OrchestratorOptions,
}

/// End-to-end detection: throttle gate → window → config → keys → session run.
pub struct ExposureDetector {
    config_source: Arc<dyn ConfigSource>,
    key_source: Arc<dyn KeySource>,
    recorder: Arc<dyn RunRecorder>,
    policy: WindowPolicy,
    orchestrator: SessionOrchestrator,
}

impl ExposureDetector {
    pub fn new(deps: DetectorDeps) -> Self {
        let orchestrator =
            SessionOrchestrator::new(deps.session_factory, deps.recorder.clone(), deps.options);
        Self {
            config_source: deps.config_source,
            key_source: deps.key_source,
            recorder: deps.recorder,
            policy: deps.policy,
            orchestrator,
        }
    }

    /// Build a detector whose policy comes from `config` and whose last run is
    /// persisted under `config.data_dir`.
    pub fn from_config(
        config: &DetectionConfig,
        config_source: Arc<dyn ConfigSource>,
        key_source: Arc<dyn KeySource>,
        session_factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self::new(
            DetectorDeps::builder()
                .config_source(config_source)
                .key_source(key_source)
                .session_factory(session_factory)
                .recorder(Arc::new(FileRunRecorder::new(config.last_run_path())))
                .policy(WindowPolicy::from_config(config))
                .options(OrchestratorOptions::from_config(config))
                .build(),
        )
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub async fn detect(&self, observer: &dyn RunObserver) -> Result<DetectionReport, DetectionError> {
        self.detect_at(Utc::now(), observer, &CancelToken::new()).await
    }

    /// Run one detection as of `now`.
    ///
    /// Throttling, fetch, and busy errors are returned before the session
    /// lifecycle begins and are not delivered to `observer`. The run slot is
    /// claimed before the recorder is read, so concurrent calls never fetch
    /// twice.
    pub async fn detect_at(
        &self,
        now: DateTime<Utc>,
        observer: &dyn RunObserver,
        cancel: &CancelToken,
    ) -> Result<DetectionReport, DetectionError> {
        let permit = self.orchestrator.try_begin()?;

        let last_run = self
            .recorder
            .last_success()
            .await
            .map_err(DetectionError::Recorder)?;

        if !self.policy.should_run(last_run.as_ref(), now) {
            if self.policy.enforce_throttle {
                info!(
                    next_eligible = ?self.policy.next_eligible(last_run.as_ref()),
                    "Last detection too recent, skipping"
                );
                self.policy.gate(last_run.as_ref(), now)?;
            } else {
                warn!("Last detection within minimum interval; throttle is advisory, continuing");
            }
        }

        let window = self.policy.select_window(last_run.as_ref(), now);
        info!(window = %window, days = window.length().num_days(), "Detection window selected");

        let config = self
            .config_source
            .fetch_config()
            .await
            .map_err(DetectionError::ConfigFetch)?;

        let keys = self
            .key_source
            .fetch_keys(window.start)
            .await
            .map_err(DetectionError::KeyFetch)?;
        info!(keys = keys.len(), "Fetched diagnosis keys");

        let run = self
            .orchestrator
            .run_with_permit(permit, config, keys, now, observer, cancel)
            .await?;

        let report = DetectionReport { window, run };
        info!("Detection complete. {report}");
        Ok(report)
    }
}
