use async_trait::async_trait;
use tracing::{error, info, warn};

use exposure_common::{DetectionError, ExposureSummary};
use exposure_session::RunObserver;

/// Observer that writes run notifications to the tracing log.
pub struct LogObserver;

#[async_trait]
impl RunObserver for LogObserver {
    async fn on_started(&self) -> anyhow::Result<()> {
        info!("Exposure detection started");
        Ok(())
    }

    async fn on_finished(&self, summary: &ExposureSummary) -> anyhow::Result<()> {
        if summary.has_exposure() {
            warn!(
                matched_keys = summary.matched_key_count,
                days_since_last_exposure = summary.days_since_last_exposure,
                max_risk_score = summary.maximum_risk_score,
                "Exposure detected"
            );
        } else {
            info!("Exposure detection finished, no exposure");
        }
        Ok(())
    }

    async fn on_failed(&self, err: &DetectionError) -> anyhow::Result<()> {
        if err.is_fatal() {
            error!(kind = %err.kind(), error = %err, "Exposure detection hit a platform contract violation");
        } else {
            warn!(kind = %err.kind(), error = %err, "Exposure detection failed");
        }
        Ok(())
    }
}
