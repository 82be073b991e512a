//! Remote collaborators consulted before a run starts.
//!
//! How configuration and keys are fetched (and in what format) is up to the
//! embedding application; the detector only needs these two calls, once each
//! per run.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use exposure_common::{DiagnosisKey, MatchingConfig};

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch_config(&self) -> Result<MatchingConfig>;
}

#[async_trait]
pub trait KeySource: Send + Sync {
    /// Keys published since `since`, in server order.
    async fn fetch_keys(&self, since: DateTime<Utc>) -> Result<Vec<DiagnosisKey>>;
}

#[async_trait]
impl<S: ConfigSource + ?Sized> ConfigSource for Arc<S> {
    async fn fetch_config(&self) -> Result<MatchingConfig> {
        (**self).fetch_config().await
    }
}

#[async_trait]
impl<S: KeySource + ?Sized> KeySource for Arc<S> {
    async fn fetch_keys(&self, since: DateTime<Utc>) -> Result<Vec<DiagnosisKey>> {
        (**self).fetch_keys(since).await
    }
}
