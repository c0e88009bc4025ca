//! API request and response models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversion::{Job, JobCounts, JobId, JobStatus};

/// Public path of a downloadable artifact.
pub fn download_url(file_name: &str) -> String {
    format!("/download/{}", file_name)
}

/// Public path of a job's status resource.
pub fn status_url(id: JobId) -> String {
    format!("/status/{}", id)
}

/// Request body for `POST /convert`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConvertRequest {
    pub url: String,
}

/// Whether `POST /convert` waits for the transcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    #[default]
    Sync,
    Async,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvertQuery {
    #[serde(default)]
    pub mode: SubmitMode,
}

/// Response of a synchronous conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertResponse {
    pub task_id: JobId,
    pub download_url: String,
    pub file_path: String,
}

impl From<&Job> for ConvertResponse {
    fn from(job: &Job) -> Self {
        Self {
            task_id: job.id(),
            download_url: download_url(&job.file_name()),
            file_path: job.output_path().to_string_lossy().to_string(),
        }
    }
}

/// Response of an asynchronous submission.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedResponse {
    pub task_id: JobId,
    pub status_url: String,
}

/// Coarse status reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicStatus {
    Processing,
    Completed,
    Failed,
}

impl From<JobStatus> for PublicStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued | JobStatus::Running => Self::Processing,
            JobStatus::Completed => Self::Completed,
            JobStatus::Failed => Self::Failed,
        }
    }
}

/// Response of `GET /status/{task_id}`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub task_id: JobId,
    pub status: PublicStatus,
    /// Fine grained job state.
    pub state: JobStatus,
    /// Seconds of media processed so far, while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the job was granted an admission slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl StatusResponse {
    pub fn from_job(job: &Job, ttl: Duration) -> Self {
        let status = job.status();
        Self {
            task_id: job.id(),
            status: status.into(),
            state: status,
            progress: job.progress(),
            download_url: (status == JobStatus::Completed).then(|| download_url(&job.file_name())),
            error: job.error().map(|failure| failure.message.clone()),
            created_at: job.created_at(),
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            expires_at: job.expires_at(ttl),
        }
    }
}

/// Admission limiter snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotsResponse {
    pub capacity: usize,
    pub available: usize,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcoder: Option<String>,
    pub slots: SlotsResponse,
    pub jobs: JobCounts,
    pub pending_deletions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_status_of_queued_job() {
        let job = Job::new("http://example.test/a.m3u8", Path::new("/tmp/out"));
        let response = StatusResponse::from_job(&job, Duration::from_secs(1800));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["state"], "queued");
        assert!(json.get("progress").is_none());
        assert!(json.get("download_url").is_none());
        assert!(json.get("error").is_none());
        assert!(json.get("started_at").is_none());
        assert_eq!(json["task_id"], job.id().to_string());
    }

    #[test]
    fn test_submit_mode_parsing() {
        let query: ConvertQuery = serde_json::from_str(r#"{"mode":"async"}"#).unwrap();
        assert_eq!(query.mode, SubmitMode::Async);
        let query: ConvertQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.mode, SubmitMode::Sync);
    }

    #[test]
    fn test_convert_response_paths() {
        let job = Job::new("http://example.test/a.m3u8", Path::new("/tmp/out"));
        let response = ConvertResponse::from(&job);
        assert_eq!(response.download_url, format!("/download/{}.mp3", job.id()));
        assert!(response.file_path.ends_with(&format!("{}.mp3", job.id())));
    }
}
