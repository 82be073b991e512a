use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use exposure_common::{DetectionError, ExposureSummary};
use exposure_session::RunObserver;

/// Delivers each notification to every registered observer.
/// A failing observer is logged and does not stop delivery to the rest.
#[derive(Default)]
pub struct ObserverFanout {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl ObserverFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl RunObserver for ObserverFanout {
    async fn on_started(&self) -> anyhow::Result<()> {
        for (index, observer) in self.observers.iter().enumerate() {
            if let Err(e) = observer.on_started().await {
                warn!(observer = index, error = %e, "Observer failed on run start");
            }
        }
        Ok(())
    }

    async fn on_finished(&self, summary: &ExposureSummary) -> anyhow::Result<()> {
        for (index, observer) in self.observers.iter().enumerate() {
            if let Err(e) = observer.on_finished(summary).await {
                warn!(observer = index, error = %e, "Observer failed on run completion");
            }
        }
        Ok(())
    }

    async fn on_failed(&self, err: &DetectionError) -> anyhow::Result<()> {
        for (index, observer) in self.observers.iter().enumerate() {
            if let Err(e) = observer.on_failed(err).await {
                warn!(observer = index, error = %e, "Observer failed on run failure");
            }
        }
        Ok(())
    }
}
