//! Conversion job entity and its state machine.
//!
//! ```text
//! Queued --(resolved + admitted)--> Running --(exit 0)--> Completed
//! Queued --(resolution fails)-----> Failed
//! Running --(exit != 0 | error)---> Failed
//! ```
//!
//! `Completed` and `Failed` are terminal.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Extension of every produced artifact.
pub const OUTPUT_EXTENSION: &str = "mp3";

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Artifact file name owned by this job.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, OUTPUT_EXTENSION)
    }

    /// Recover the job id from an artifact file name.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{}", OUTPUT_EXTENSION))?;
        stem.parse().ok()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    /// Error category, see [`Error::kind`].
    pub kind: String,
    pub message: String,
}

impl From<&Error> for JobFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// A single HLS to MP3 conversion.
///
/// Fields are only mutated through the transition methods below, which keep
/// the status monotonic and the `error`/`Failed` pairing intact.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    status: JobStatus,
    source_url: String,
    resolved_url: Option<String>,
    output_path: PathBuf,
    progress_secs: f64,
    error: Option<JobFailure>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a queued job whose artifact will live in `output_dir`.
    pub fn new(source_url: impl Into<String>, output_dir: &Path) -> Self {
        let id = JobId::new();
        Self {
            id,
            status: JobStatus::Queued,
            source_url: source_url.into(),
            resolved_url: None,
            output_path: output_dir.join(id.file_name()),
            progress_secs: 0.0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn resolved_url(&self) -> Option<&str> {
        self.resolved_url.as_deref()
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn file_name(&self) -> String {
        self.id.file_name()
    }

    /// Media time processed so far, only meaningful while running.
    pub fn progress(&self) -> Option<f64> {
        (self.status == JobStatus::Running).then_some(self.progress_secs)
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Instant after which the job becomes eligible for the retention sweep.
    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A terminal job whose age exceeds `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status.is_terminal() && now > self.expires_at(ttl)
    }

    /// Record the concrete stream URL. Allowed once, before the job runs.
    pub fn set_resolved_url(&mut self, url: impl Into<String>) -> Result<()> {
        if self.status != JobStatus::Queued || self.resolved_url.is_some() {
            return Err(Error::invalid_transition(self.status, "resolved"));
        }
        self.resolved_url = Some(url.into());
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Raise the progress marker. Returns `false` when the value did not move
    /// it forward.
    pub fn advance_progress(&mut self, secs: f64) -> Result<bool> {
        if self.status != JobStatus::Running {
            return Err(Error::invalid_transition(self.status, "progress"));
        }
        if !secs.is_finite() || secs <= self.progress_secs {
            return Ok(false);
        }
        self.progress_secs = secs;
        Ok(true)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(failure);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::invalid_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }
}
