//! Retention sweeper for expired conversion artifacts.
//!
//! A single background loop owns every deletion: expired jobs found on each
//! tick, explicit evictions (e.g. after a download), and files whose deletion
//! failed earlier and is being retried.
//!
//! Eviction removes the registry entry first and deletes the file second.
//! The registry therefore never points at a file that is already gone, and a
//! file that could not be deleted stays queued here until a later tick
//! succeeds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::JobId;
use super::registry::JobRegistry;
use crate::utils::fs::remove_file;

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs removed from the registry.
    pub evicted: usize,
    /// Artifacts deleted, including retried ones.
    pub deleted: usize,
    /// Artifacts still waiting for a successful deletion.
    pub pending: usize,
}

pub struct RetentionSweeper {
    registry: Arc<JobRegistry>,
    ttl: Duration,
    interval: Duration,
    pending: Mutex<Vec<PathBuf>>,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<JobRegistry>, ttl: Duration, interval: Duration) -> Self {
        Self {
            registry,
            ttl,
            interval,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Number of artifacts whose deletion is being retried.
    pub fn pending_deletions(&self) -> usize {
        self.pending.lock().len()
    }

    /// Spawn the sweep loop. It exits when `cancel_token` fires.
    pub fn start(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let sweeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(
                ttl_secs = sweeper.ttl.as_secs(),
                interval_secs = sweeper.interval.as_secs(),
                "Retention sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Retention sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = sweeper.sweep_once(Utc::now()).await;
                        if report.evicted > 0 || report.pending > 0 {
                            info!(
                                evicted = report.evicted,
                                deleted = report.deleted,
                                pending = report.pending,
                                "Retention sweep finished"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Run one sweep as of `now`.
    ///
    /// Idempotent: a second sweep at the same instant finds nothing to do.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            deleted: self.retry_pending().await,
            ..Default::default()
        };

        for id in self.registry.list_expired(now, self.ttl) {
            if let Some(deleted) = self.evict(id).await {
                report.evicted += 1;
                if deleted {
                    report.deleted += 1;
                }
            }
        }

        report.pending = self.pending_deletions();
        report
    }

    /// Remove a job and delete its artifact.
    ///
    /// Returns `None` if the job was not registered, otherwise whether the
    /// artifact is gone from disk. A failed deletion is retried on later
    /// ticks.
    pub async fn evict(&self, id: JobId) -> Option<bool> {
        let job = self.registry.remove(id)?;
        let path = job.output_path().to_path_buf();

        match remove_file(&path).await {
            Ok(()) => {
                info!(job_id = %id, path = %path.display(), "Deleted expired artifact");
                Some(true)
            }
            Err(e) => {
                warn!(
                    job_id = %id,
                    path = %path.display(),
                    error = %e,
                    "Failed to delete artifact, will retry"
                );
                self.pending.lock().push(path);
                Some(false)
            }
        }
    }

    async fn retry_pending(&self) -> usize {
        let queued = std::mem::take(&mut *self.pending.lock());
        if queued.is_empty() {
            return 0;
        }

        let mut deleted = 0;
        let mut still_pending = Vec::new();
        for path in queued {
            match remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted previously failed artifact");
                    deleted += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Artifact deletion failed again");
                    still_pending.push(path);
                }
            }
        }

        self.pending.lock().extend(still_pending);
        deleted
    }
}
