//! Conversion manager.
//!
//! Owns the job registry, the admission limiter and the retention sweeper,
//! and drives each job through resolution, admission and transcoding.
//!
//! Every job runs inside [`ConversionManager::run_job`], which guarantees a
//! terminal state on every exit path: success, error, service shutdown, or
//! the surrounding task being dropped (e.g. a client disconnecting from a
//! synchronous request). The admission slot is held until that terminal
//! state has been recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    AdmissionLimiter, AdmissionSlot, Job, JobId, JobRegistry, JobStatus, ProgressReporter,
    RetentionSweeper,
};
use crate::config::ConversionConfig;
use crate::resolver::SourceResolver;
use crate::transcode::{TranscodeOutcome, TranscodeRequest, Transcoder};
use crate::utils::fs::{ensure_dir_all, probe_writable, remove_file, remove_file_sync};
use crate::{Error, Result};

pub struct ConversionManager {
    config: ConversionConfig,
    registry: Arc<JobRegistry>,
    limiter: AdmissionLimiter,
    resolver: Arc<dyn SourceResolver>,
    transcoder: Arc<dyn Transcoder>,
    sweeper: Arc<RetentionSweeper>,
    cancel_token: CancellationToken,
    tasks: TaskTracker,
}

impl ConversionManager {
    pub fn new(
        config: ConversionConfig,
        resolver: Arc<dyn SourceResolver>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let limiter = AdmissionLimiter::new(config.max_concurrent);
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&registry),
            config.retention_ttl,
            config.sweep_interval,
        ));

        Self {
            config,
            registry,
            limiter,
            resolver,
            transcoder,
            sweeper,
            cancel_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Tie the manager's lifetime to an outer token.
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Create the output directory and check that it is writable.
    pub async fn prepare(&self) -> Result<()> {
        ensure_dir_all(&self.config.output_dir).await?;
        probe_writable(&self.config.output_dir)?;
        info!(output_dir = %self.config.output_dir.display(), "Output directory ready");
        Ok(())
    }

    /// Spawn the retention sweeper loop.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.sweeper.start(self.cancel_token.child_token())
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    pub fn sweeper(&self) -> &Arc<RetentionSweeper> {
        &self.sweeper
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    /// Register a job and run it in the background.
    pub fn submit(self: &Arc<Self>, url: &str) -> Result<JobId> {
        let id = self.admit(url)?;
        let manager = Arc::clone(self);
        self.tasks.spawn(async move {
            // Failures are recorded on the job.
            let _ = manager.run_job(id).await;
        });
        Ok(id)
    }

    /// Register a job and run it to completion.
    ///
    /// Returns the completed job, or the error that failed it. Dropping the
    /// returned future kills the transcoder and fails the job.
    pub async fn convert(&self, url: &str) -> Result<Job> {
        let id = self.admit(url)?;
        self.run_job(id).await?;
        self.registry.get(id)
    }

    /// Snapshot of a job.
    pub fn job(&self, id: JobId) -> Result<Job> {
        self.registry.get(id)
    }

    /// Look up a downloadable artifact by its file name.
    ///
    /// Unknown names and jobs that did not complete are `NotFound`; a
    /// completed job past its TTL or whose file is gone is `Expired`.
    pub async fn artifact_for(&self, file_name: &str) -> Result<Job> {
        let not_found = || Error::not_found("File", file_name);

        let job = self
            .registry
            .find_by_file_name(file_name)
            .ok_or_else(not_found)?;
        if job.status() != JobStatus::Completed {
            return Err(not_found());
        }
        if job.is_expired(Utc::now(), self.config.retention_ttl) {
            return Err(Error::Expired(file_name.to_string()));
        }

        match tokio::fs::metadata(job.output_path()).await {
            Ok(meta) if meta.is_file() => Ok(job),
            _ => Err(Error::Expired(file_name.to_string())),
        }
    }

    /// Evict a job and its artifact right away.
    pub async fn release(&self, id: JobId) -> Option<bool> {
        self.sweeper.evict(id).await
    }

    /// Stop accepting work, kill running transcodes and wait for every job
    /// task to record its final state.
    pub async fn shutdown(&self) {
        info!(
            running = self.limiter.in_use(),
            "Shutting down conversion manager"
        );
        self.cancel_token.cancel();
        self.limiter.close();
        self.tasks.close();
        self.tasks.wait().await;
        info!("Conversion manager stopped");
    }

    fn admit(&self, url: &str) -> Result<JobId> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let url = validate_url(url)?;
        let id = self
            .registry
            .create(Job::new(url.as_str(), &self.config.output_dir))?;
        info!(job_id = %id, url = %url, "Conversion submitted");
        Ok(id)
    }

    async fn run_job(&self, id: JobId) -> Result<()> {
        let output_path = self.registry.get(id)?.output_path().to_path_buf();

        // Declared before the guard so the slot outlives it on drop.
        let mut slot = None;
        let mut guard = AbortGuard {
            registry: Arc::clone(&self.registry),
            id,
            output_path: output_path.clone(),
            armed: true,
        };

        let result = self
            .drive(id, &output_path, &mut slot)
            .await
            .and_then(|outcome| self.registry.mark_completed(id).map(|()| outcome));

        match result {
            Ok(outcome) => {
                guard.armed = false;
                drop(slot);
                info!(
                    job_id = %id,
                    path = %output_path.display(),
                    media_secs = outcome.media_secs,
                    wall_secs = outcome.wall_secs,
                    "Conversion completed"
                );
                Ok(())
            }
            Err(err) => {
                if let Err(e) = remove_file(&output_path).await {
                    warn!(
                        job_id = %id,
                        path = %output_path.display(),
                        error = %e,
                        "Failed to remove partial output"
                    );
                }
                if let Err(e) = self.registry.mark_failed(id, &err) {
                    warn!(job_id = %id, error = %e, "Failed to record job failure");
                }
                guard.armed = false;
                drop(slot);
                warn!(job_id = %id, error = %err, "Conversion failed");
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        id: JobId,
        output_path: &Path,
        slot: &mut Option<AdmissionSlot>,
    ) -> Result<TranscodeOutcome> {
        let job = self.registry.get(id)?;
        let source = validate_url(job.source_url())?;

        let resolved = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(Error::Cancelled),
            resolved = self.resolver.resolve(&source) => resolved?,
        };
        self.registry.set_resolved(id, resolved.url.as_str())?;
        info!(
            job_id = %id,
            resolved = %resolved.url,
            selection = %resolved.selection,
            "Source resolved"
        );

        let admitted = tokio::select! {
            _ = self.cancel_token.cancelled() => return Err(Error::Cancelled),
            admitted = self.limiter.acquire() => admitted?,
        };
        *slot = Some(admitted);
        self.registry.mark_running(id)?;
        debug!(
            job_id = %id,
            in_use = self.limiter.in_use(),
            capacity = self.limiter.capacity(),
            "Admission slot granted"
        );

        let request = TranscodeRequest {
            job_id: id,
            source_url: resolved.url.to_string(),
            output_path: output_path.to_path_buf(),
        };
        let progress = ProgressReporter::new(id, Arc::clone(&self.registry));
        let outcome = self
            .transcoder
            .transcode(&request, &progress, self.cancel_token.child_token())
            .await?;

        match tokio::fs::metadata(output_path).await {
            Ok(meta) if meta.is_file() => Ok(outcome),
            _ => Err(Error::TranscodeFailure {
                code: Some(0),
                message: "transcoder exited successfully but produced no output file".to_string(),
            }),
        }
    }
}

/// Parse a submitted URL, accepting absolute http(s) URLs only.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("invalid url '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::validation(format!(
            "unsupported url scheme '{}'",
            other
        ))),
    }
}

/// Fails the job if its task is dropped before reaching a terminal state.
struct AbortGuard {
    registry: Arc<JobRegistry>,
    id: JobId,
    output_path: PathBuf,
    armed: bool,
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(job_id = %self.id, "Conversion task dropped before finishing");
        if let Err(e) = remove_file_sync(&self.output_path) {
            warn!(
                job_id = %self.id,
                path = %self.output_path.display(),
                error = %e,
                "Failed to remove partial output"
            );
        }
        if let Err(e) = self.registry.mark_failed(self.id, &Error::Cancelled) {
            debug!(job_id = %self.id, error = %e, "Job already terminal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolvedSource, Selection};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    const SOURCE: &str = "http://example.test/stream.m3u8";

    struct AudioResolver;

    #[async_trait]
    impl SourceResolver for AudioResolver {
        async fn resolve(&self, url: &Url) -> Result<ResolvedSource> {
            Ok(ResolvedSource::new(
                url.join("audio.m3u8").unwrap(),
                Selection::AudioRendition,
            ))
        }
    }

    struct BrokenManifestResolver;

    #[async_trait]
    impl SourceResolver for BrokenManifestResolver {
        async fn resolve(&self, _url: &Url) -> Result<ResolvedSource> {
            Err(Error::Resolution(
                "manifest is not a valid M3U8 playlist".to_string(),
            ))
        }
    }

    enum Behavior {
        Succeed,
        Fail(&'static str),
        NoOutput,
        /// Finish only once a permit is available.
        Gate(Arc<Semaphore>),
    }

    struct FakeTranscoder {
        behavior: Behavior,
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeTranscoder {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn probe_version(&self) -> Result<String> {
            Ok("fake 1.0".to_string())
        }

        async fn transcode(
            &self,
            request: &TranscodeRequest,
            progress: &ProgressReporter,
            cancel: CancellationToken,
        ) -> Result<TranscodeOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result: Result<TranscodeOutcome> = async {
                match &self.behavior {
                    Behavior::Succeed => {
                        progress.report(1.0);
                        progress.report(2.0);
                        tokio::fs::write(&request.output_path, b"ID3").await?;
                        Ok(TranscodeOutcome {
                            media_secs: 2.0,
                            wall_secs: 0.0,
                        })
                    }
                    Behavior::Fail(message) => {
                        tokio::fs::write(&request.output_path, b"partial").await?;
                        Err(Error::TranscodeFailure {
                            code: Some(1),
                            message: message.to_string(),
                        })
                    }
                    Behavior::NoOutput => Ok(TranscodeOutcome::default()),
                    Behavior::Gate(gate) => {
                        tokio::fs::write(&request.output_path, b"partial").await?;
                        tokio::select! {
                            _ = cancel.cancelled() => Err(Error::Cancelled),
                            permit = gate.acquire() => {
                                permit.map_err(|_| Error::Cancelled)?.forget();
                                tokio::fs::write(&request.output_path, b"ID3").await?;
                                Ok(TranscodeOutcome::default())
                            }
                        }
                    }
                }
            }
            .await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    fn manager(
        dir: &Path,
        max_concurrent: usize,
        resolver: Arc<dyn SourceResolver>,
        transcoder: Arc<FakeTranscoder>,
    ) -> Arc<ConversionManager> {
        let config = ConversionConfig {
            max_concurrent,
            output_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Arc::new(ConversionManager::new(config, resolver, transcoder))
    }

    async fn wait_for_status(manager: &ConversionManager, id: JobId, status: JobStatus) -> Job {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = manager.job(id).unwrap();
                if job.status() == status {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {id} never reached {status}"))
    }

    #[tokio::test]
    async fn test_convert_completes() {
        let temp = TempDir::new().unwrap();
        let transcoder = FakeTranscoder::new(Behavior::Succeed);
        let manager = manager(temp.path(), 3, Arc::new(AudioResolver), transcoder);
        manager.prepare().await.unwrap();

        let job = manager.convert(SOURCE).await.unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.resolved_url(), Some("http://example.test/audio.m3u8"));
        assert!(job.error().is_none());
        assert!(job.completed_at().is_some());
        assert_eq!(std::fs::read(job.output_path()).unwrap(), b"ID3");

        let artifact = manager.artifact_for(&job.file_name()).await.unwrap();
        assert_eq!(artifact.id(), job.id());
        assert_eq!(manager.limiter().available(), 3);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_rejected() {
        let temp = TempDir::new().unwrap();
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Succeed),
        );

        for url in ["not a url", "ftp://example.test/a.m3u8", "file:///etc/passwd"] {
            let err = manager.convert(url).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{url}: {err:?}");
        }
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_never_transcodes() {
        let temp = TempDir::new().unwrap();
        let transcoder = FakeTranscoder::new(Behavior::Succeed);
        let manager = manager(
            temp.path(),
            3,
            Arc::new(BrokenManifestResolver),
            Arc::clone(&transcoder),
        );

        let id = manager.submit(SOURCE).unwrap();
        let job = wait_for_status(&manager, id, JobStatus::Failed).await;

        assert_eq!(job.error().unwrap().kind, "resolution_error");
        assert!(job.resolved_url().is_none());
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transcode_failure_removes_partial_output() {
        let temp = TempDir::new().unwrap();
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Fail("no such codec")),
        );

        let err = manager.convert(SOURCE).await.unwrap_err();
        assert!(matches!(err, Error::TranscodeFailure { .. }));

        let counts = manager.registry().counts();
        assert_eq!(counts.failed, 1);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
        assert_eq!(manager.limiter().available(), 3);
    }

    #[tokio::test]
    async fn test_failed_job_is_not_downloadable() {
        let temp = TempDir::new().unwrap();
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Fail("no such codec")),
        );

        let id = manager.submit(SOURCE).unwrap();
        let job = wait_for_status(&manager, id, JobStatus::Failed).await;
        assert!(job.error().unwrap().message.contains("no such codec"));

        let err = manager.artifact_for(&id.file_name()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_output_fails_job() {
        let temp = TempDir::new().unwrap();
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::NoOutput),
        );

        let err = manager.convert(SOURCE).await.unwrap_err();
        assert!(matches!(err, Error::TranscodeFailure { code: Some(0), .. }));
    }

    #[tokio::test]
    async fn test_second_job_waits_for_free_slot() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let transcoder = FakeTranscoder::new(Behavior::Gate(Arc::clone(&gate)));
        let manager = manager(
            temp.path(),
            1,
            Arc::new(AudioResolver),
            Arc::clone(&transcoder),
        );

        let first = manager.submit(SOURCE).unwrap();
        wait_for_status(&manager, first, JobStatus::Running).await;
        let second = manager.submit(SOURCE).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.job(second).unwrap().status(), JobStatus::Queued);

        gate.add_permits(1);
        wait_for_status(&manager, first, JobStatus::Completed).await;
        wait_for_status(&manager, second, JobStatus::Running).await;

        gate.add_permits(1);
        wait_for_status(&manager, second, JobStatus::Completed).await;
        assert_eq!(transcoder.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_burst_never_exceeds_capacity() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let transcoder = FakeTranscoder::new(Behavior::Gate(Arc::clone(&gate)));
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            Arc::clone(&transcoder),
        );

        let ids: Vec<JobId> = (0..8).map(|_| manager.submit(SOURCE).unwrap()).collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.registry().counts().running, 3);

        gate.add_permits(8);
        for id in ids {
            wait_for_status(&manager, id, JobStatus::Completed).await;
        }
        assert_eq!(transcoder.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_fails_running_jobs() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let manager = manager(
            temp.path(),
            1,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Gate(gate)),
        );

        let running = manager.submit(SOURCE).unwrap();
        wait_for_status(&manager, running, JobStatus::Running).await;
        let queued = manager.submit(SOURCE).unwrap();

        manager.shutdown().await;

        for id in [running, queued] {
            let job = manager.job(id).unwrap();
            assert_eq!(job.status(), JobStatus::Failed);
            assert_eq!(job.error().unwrap().kind, "cancelled");
            assert!(!job.output_path().exists());
        }
        assert!(matches!(manager.submit(SOURCE), Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_dropped_convert_fails_job_and_frees_slot() {
        let temp = TempDir::new().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let manager = manager(
            temp.path(),
            1,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Gate(gate)),
        );

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.convert(SOURCE).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.registry().counts().running == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let counts = manager.registry().counts();
        assert_eq!(counts.running, 0);
        assert_eq!(counts.failed, 1);
        assert_eq!(manager.limiter().available(), 1);
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_artifact_lookup_errors() {
        let temp = TempDir::new().unwrap();
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Succeed),
        );

        assert!(matches!(
            manager.artifact_for("../../etc/passwd").await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            manager.artifact_for(&JobId::new().file_name()).await,
            Err(Error::NotFound { .. })
        ));

        let job = manager.convert(SOURCE).await.unwrap();
        std::fs::remove_file(job.output_path()).unwrap();
        assert!(matches!(
            manager.artifact_for(&job.file_name()).await,
            Err(Error::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_release_evicts_job_and_file() {
        let temp = TempDir::new().unwrap();
        let manager = manager(
            temp.path(),
            3,
            Arc::new(AudioResolver),
            FakeTranscoder::new(Behavior::Succeed),
        );

        let job = manager.convert(SOURCE).await.unwrap();
        assert_eq!(manager.release(job.id()).await, Some(true));
        assert!(!job.output_path().exists());
        assert!(matches!(manager.job(job.id()), Err(Error::NotFound { .. })));
        assert_eq!(manager.release(job.id()).await, None);
    }
}
