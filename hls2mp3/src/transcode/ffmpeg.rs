//! FFmpeg transcoder implementation.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use process_utils::{OutputLine, OutputStream, spawn_line_drain, tokio_command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::progress::{parse_elapsed, parse_speed};
use super::{TranscodeOutcome, TranscodeRequest, Transcoder};
use crate::config::TranscoderConfig;
use crate::conversion::ProgressReporter;
use crate::{Error, Result};

/// Diagnostic lines kept for the failure message.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// How long to keep reading output after the process exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Transcoder driving an ffmpeg-compatible executable.
pub struct FfmpegTranscoder {
    config: TranscoderConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Build ffmpeg command arguments.
    ///
    /// Video is dropped and audio is encoded with the configured fixed
    /// profile. Progress goes to stdout as key/value lines; stderr only
    /// carries warnings and errors.
    pub fn build_args(&self, source_url: &str, output_path: &Path) -> Vec<String> {
        let profile = &self.config.profile;
        let mut args = Vec::new();

        args.extend(["-y".to_string(), "-hide_banner".to_string()]);
        args.push("-nostdin".to_string());
        args.push("-nostats".to_string());
        args.extend(["-loglevel".to_string(), "warning".to_string()]);
        args.extend(["-progress".to_string(), "pipe:1".to_string()]);

        args.extend(["-i".to_string(), source_url.to_string()]);

        args.push("-vn".to_string());
        args.extend(["-acodec".to_string(), profile.codec.clone()]);
        args.extend(["-ab".to_string(), profile.bitrate.clone()]);
        args.extend(["-ac".to_string(), profile.channels.to_string()]);
        args.extend(["-ar".to_string(), profile.sample_rate.to_string()]);

        args.push(output_path.to_string_lossy().to_string());

        args
    }
}

/// Progress and diagnostics collected while the process runs.
struct RunState {
    last_elapsed: f64,
    last_speed: Option<f64>,
    diagnostics: VecDeque<String>,
}

impl RunState {
    fn new() -> Self {
        Self {
            last_elapsed: 0.0,
            last_speed: None,
            diagnostics: VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES),
        }
    }

    fn observe(&mut self, line: &OutputLine, progress: &ProgressReporter) {
        if let Some(speed) = parse_speed(&line.text) {
            self.last_speed = Some(speed);
        }

        if let Some(secs) = parse_elapsed(&line.text) {
            if secs > self.last_elapsed {
                self.last_elapsed = secs;
                progress.report(secs);
            }
            return;
        }

        if line.stream == OutputStream::Stderr {
            trace!(job_id = %progress.job_id(), "ffmpeg: {}", line.text);
            if self.diagnostics.len() == DIAGNOSTIC_TAIL_LINES {
                self.diagnostics.pop_front();
            }
            self.diagnostics.push_back(line.text.trim().to_string());
        }
    }

    fn diagnostics(&self) -> String {
        if self.diagnostics.is_empty() {
            return "transcoder produced no diagnostic output".to_string();
        }
        self.diagnostics
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe_version(&self) -> Result<String> {
        let binary = &self.config.binary_path;
        let output = tokio_command(binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::ExecutorSpawn(format!("{}: {}", binary, e)))?;

        if !output.status.success() {
            return Err(Error::ExecutorSpawn(format!(
                "{} -version exited with {}",
                binary, output.status
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::ExecutorSpawn(format!("{} -version printed nothing", binary)))
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutcome> {
        let args = self.build_args(&request.source_url, &request.output_path);

        info!(
            job_id = %request.job_id,
            source = %request.source_url,
            output = %request.output_path.display(),
            "Starting transcode"
        );
        debug!(job_id = %request.job_id, "ffmpeg args: {:?}", args);

        let started = Instant::now();
        let mut child = tokio_command(&self.config.binary_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ExecutorSpawn(format!("{}: {}", self.config.binary_path, e)))?;

        let mut drain = spawn_line_drain(&mut child);
        let mut state = RunState::new();
        let mut lines_open = true;

        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(job_id = %request.job_id, "Transcode cancelled, killing process");
                    if let Err(e) = child.kill().await {
                        warn!(job_id = %request.job_id, error = %e, "Failed to kill transcoder");
                    }
                    return Err(Error::Cancelled);
                }
                line = drain.lines.recv(), if lines_open => match line {
                    Some(line) => state.observe(&line, progress),
                    None => lines_open = false,
                },
                status = child.wait() => {
                    break status.map_err(|e| {
                        Error::Other(format!("Failed to wait for transcoder: {}", e))
                    })?;
                }
            }
        };

        // Pick up whatever was still buffered when the process exited.
        let rest = async {
            while let Some(line) = drain.lines.recv().await {
                state.observe(&line, progress);
            }
        };
        match tokio::time::timeout(DRAIN_GRACE, rest).await {
            Ok(()) => {
                if let Err(e) = drain.join().await {
                    debug!(job_id = %request.job_id, error = %e, "Error reading transcoder output");
                }
            }
            Err(_) => {
                debug!(job_id = %request.job_id, "Transcoder output still open after exit");
            }
        }

        let wall_secs = started.elapsed().as_secs_f64();

        if !status.success() {
            let message = state.diagnostics();
            error!(
                job_id = %request.job_id,
                code = ?status.code(),
                "Transcode failed: {}",
                message
            );
            return Err(Error::TranscodeFailure {
                code: status.code(),
                message,
            });
        }

        info!(
            job_id = %request.job_id,
            media_secs = state.last_elapsed,
            wall_secs,
            speed = ?state.last_speed,
            "Transcode completed"
        );

        Ok(TranscodeOutcome {
            media_secs: state.last_elapsed,
            wall_secs,
        })
    }
}
