use std::sync::Arc;

use async_trait::async_trait;
use exposure_common::{DetectionError, ExposureSummary};

/// Receives the lifecycle notifications of a detection run.
///
/// Borrowed for the duration of a single run only. Each accepted run delivers
/// `on_started` once, then exactly one of `on_finished` / `on_failed`.
/// A notification error is logged by the orchestrator and never changes the
/// run's outcome.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn on_started(&self) -> anyhow::Result<()>;

    async fn on_finished(&self, summary: &ExposureSummary) -> anyhow::Result<()>;

    async fn on_failed(&self, error: &DetectionError) -> anyhow::Result<()>;
}

/// Observer that ignores every notification.
pub struct NoopObserver;

#[async_trait]
impl RunObserver for NoopObserver {
    async fn on_started(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_finished(&self, _summary: &ExposureSummary) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_failed(&self, _error: &DetectionError) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<O: RunObserver + ?Sized> RunObserver for Arc<O> {
    async fn on_started(&self) -> anyhow::Result<()> {
        (**self).on_started().await
    }

    async fn on_finished(&self, summary: &ExposureSummary) -> anyhow::Result<()> {
        (**self).on_finished(summary).await
    }

    async fn on_failed(&self, error: &DetectionError) -> anyhow::Result<()> {
        (**self).on_failed(error).await
    }
}
