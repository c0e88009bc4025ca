//! In-memory job registry.
//!
//! Jobs live in a sharded [`DashMap`], so progress updates of one job never
//! wait on a lock held for an unrelated job. Readers always receive cloned
//! snapshots; writers go through [`JobRegistry::update`], which applies a
//! mutation to a single entry atomically.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::{debug, trace};

use super::job::{Job, JobFailure, JobId, JobStatus};
use crate::{Error, Result};

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Thread-safe table of live jobs, keyed by id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job.
    ///
    /// Rejects a job whose id or output path is already owned by a live job.
    pub fn create(&self, job: Job) -> Result<JobId> {
        // Checked before taking the entry lock: iterating while holding a
        // shard write lock would deadlock.
        if self
            .jobs
            .iter()
            .any(|entry| entry.output_path() == job.output_path())
        {
            return Err(Error::validation(format!(
                "output path {} is already reserved",
                job.output_path().display()
            )));
        }

        let id = job.id();
        match self.jobs.entry(id) {
            Entry::Occupied(_) => Err(Error::validation(format!("job {} already exists", id))),
            Entry::Vacant(vacant) => {
                vacant.insert(job);
                debug!(job_id = %id, "Job registered");
                Ok(id)
            }
        }
    }

    /// Snapshot of a job.
    pub fn get(&self, id: JobId) -> Result<Job> {
        self.jobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("Job", id.to_string()))
    }

    /// Atomically mutate a single job.
    ///
    /// Terminal jobs are frozen: mutating one fails with
    /// [`Error::InvalidStateTransition`] without running `mutator`.
    pub fn update<R, F>(&self, id: JobId, mutator: F) -> Result<R>
    where
        F: FnOnce(&mut Job) -> Result<R>,
    {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Job", id.to_string()))?;

        let status = entry.status();
        if status.is_terminal() {
            debug!(job_id = %id, %status, "Rejected update of terminal job");
            return Err(Error::invalid_transition(status, "update"));
        }

        mutator(entry.value_mut())
    }

    /// Ids of terminal jobs created more than `ttl` before `now`.
    pub fn list_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<JobId> {
        self.jobs
            .iter()
            .filter(|entry| entry.is_expired(now, ttl))
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop a job from the registry, returning its final snapshot.
    pub fn remove(&self, id: JobId) -> Option<Job> {
        self.jobs.remove(&id).map(|(_, job)| job)
    }

    /// Look up the job owning the artifact `file_name`.
    pub fn find_by_file_name(&self, file_name: &str) -> Option<Job> {
        let id = JobId::from_file_name(file_name)?;
        self.get(id).ok()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            match entry.status() {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn set_resolved(&self, id: JobId, url: &str) -> Result<()> {
        self.update(id, |job| job.set_resolved_url(url))
    }

    pub fn mark_running(&self, id: JobId) -> Result<()> {
        self.update(id, |job| job.start())?;
        debug!(job_id = %id, "Job running");
        Ok(())
    }

    /// Raise the progress marker of a running job.
    pub fn record_progress(&self, id: JobId, secs: f64) -> Result<bool> {
        let advanced = self.update(id, |job| job.advance_progress(secs))?;
        if advanced {
            trace!(job_id = %id, progress_secs = secs, "Job progress");
        }
        Ok(advanced)
    }

    pub fn mark_completed(&self, id: JobId) -> Result<()> {
        self.update(id, |job| job.complete())?;
        debug!(job_id = %id, "Job completed");
        Ok(())
    }

    pub fn mark_failed(&self, id: JobId, error: &Error) -> Result<()> {
        self.update(id, |job| job.fail(JobFailure::from(error)))?;
        debug!(job_id = %id, error = %error, "Job failed");
        Ok(())
    }
}
