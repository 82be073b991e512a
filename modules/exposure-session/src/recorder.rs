//! Last-successful-run persistence.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use exposure_common::LastRunRecord;

/// Reads and writes the timestamp of the last fully successful run.
///
/// Assumes a single writer; the orchestrator allows only one run in flight.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn last_success(&self) -> Result<Option<LastRunRecord>>;

    async fn record_success(&self, timestamp: DateTime<Utc>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryRunRecorder
// ---------------------------------------------------------------------------

/// In-process recorder. Counts writes so tests can assert when a run was recorded.
#[derive(Default)]
pub struct MemoryRunRecorder {
    last: Mutex<Option<LastRunRecord>>,
    writes: AtomicU64,
}

impl MemoryRunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_success(timestamp: DateTime<Utc>) -> Self {
        Self {
            last: Mutex::new(Some(LastRunRecord::from(timestamp))),
            writes: AtomicU64::new(0),
        }
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunRecorder for MemoryRunRecorder {
    async fn last_success(&self) -> Result<Option<LastRunRecord>> {
        let guard = self
            .last
            .lock()
            .map_err(|_| anyhow::anyhow!("run recorder mutex poisoned"))?;
        Ok(*guard)
    }

    async fn record_success(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let mut guard = self
            .last
            .lock()
            .map_err(|_| anyhow::anyhow!("run recorder mutex poisoned"))?;
        *guard = Some(LastRunRecord::from(timestamp));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileRunRecorder
// ---------------------------------------------------------------------------

/// Persists the last run as a small JSON document. A missing file means no
/// run has succeeded yet.
pub struct FileRunRecorder {
    path: PathBuf,
}

impl FileRunRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RunRecorder for FileRunRecorder {
    async fn last_success(&self) -> Result<Option<LastRunRecord>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let record: LastRunRecord = serde_json::from_slice(&raw)
            .with_context(|| format!("Corrupt last-run record at {}", self.path.display()))?;
        Ok(Some(record))
    }

    async fn record_success(&self, timestamp: DateTime<Utc>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        // Write-then-rename so a crash never leaves a truncated record behind.
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&LastRunRecord::from(timestamp))?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(path = %self.path.display(), %timestamp, "Last successful run recorded");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arc<R> blanket impl
// ---------------------------------------------------------------------------

#[async_trait]
impl<R: RunRecorder + ?Sized> RunRecorder for Arc<R> {
    async fn last_success(&self) -> Result<Option<LastRunRecord>> {
        (**self).last_success().await
    }

    async fn record_success(&self, timestamp: DateTime<Utc>) -> Result<()> {
        (**self).record_success(timestamp).await
    }
}
