use std::sync::Arc;

use tracing::debug;

use super::job::JobId;
use super::registry::JobRegistry;

/// Forwards parsed transcoder progress into the job registry.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    registry: Option<Arc<JobRegistry>>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, registry: Arc<JobRegistry>) -> Self {
        Self {
            job_id,
            registry: Some(registry),
        }
    }

    pub fn noop(job_id: JobId) -> Self {
        Self {
            job_id,
            registry: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Record `elapsed_secs` of processed media time.
    pub fn report(&self, elapsed_secs: f64) {
        let Some(registry) = &self.registry else {
            return;
        };
        if let Err(e) = registry.record_progress(self.job_id, elapsed_secs) {
            debug!(job_id = %self.job_id, error = %e, "Dropped progress update");
        }
    }
}
