//! Transcode executor.
//!
//! The executor turns a resolved media URL into an MP3 file by driving an
//! external transcoding tool. [`Transcoder`] is the seam the conversion
//! manager depends on; [`FfmpegTranscoder`] is the production implementation.

mod ffmpeg;
pub mod progress;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::conversion::{JobId, ProgressReporter};

pub use ffmpeg::FfmpegTranscoder;

/// Input for a single transcode.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub job_id: JobId,
    /// Concrete stream URL to read from.
    pub source_url: String,
    /// Reserved artifact path to write to.
    pub output_path: PathBuf,
}

/// Result of a successful transcode.
#[derive(Debug, Clone, Default)]
pub struct TranscodeOutcome {
    /// Last media time reported by the tool.
    pub media_secs: f64,
    /// Wall-clock duration of the run.
    pub wall_secs: f64,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Check that the tool can be launched and return its version banner.
    async fn probe_version(&self) -> Result<String>;

    /// Produce `request.output_path` from `request.source_url`.
    ///
    /// Implementations must stop the underlying process and return
    /// [`crate::Error::Cancelled`] once `cancel` fires.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutcome>;
}
