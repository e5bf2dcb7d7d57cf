//! Upload job lifecycle: create, start, cancel, observe.
//!
//! The database row is the system of record for every job. The manager
//! additionally keeps a registry of the jobs this process is running, keyed
//! by external job id, holding the cancellation token of each. Entries are
//! added when a job starts and removed when its background task ends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use lorekeep_core::{
    new_upload_job_id, new_v7, EmbeddingBackend, Error, ErrorLogEntry, EventBus, JobCompletion,
    JobOptions, NewUploadJob, ProgressEvent, Result, UploadJob, UploadJobStatus, UploadSource,
};
use lorekeep_db::Repositories;

use crate::batch::{BatchProcessor, BatchRequest, JobRef};
use crate::config::IngestConfig;
use crate::extraction::ExtractionRegistry;
use crate::processor::FileProcessor;
use crate::scan::resolve_source;

/// Default page size for [`UploadManager::list_jobs`].
pub const DEFAULT_JOB_LIST_LIMIT: i64 = 50;

const INCOMING_PREFIX: &str = "incoming_";

struct RunningJob {
    cancel: CancellationToken,
    done: CancellationToken,
}

/// Creates and drives upload jobs.
#[derive(Clone)]
pub struct UploadManager {
    repos: Repositories,
    batch: Arc<BatchProcessor>,
    config: IngestConfig,
    events: EventBus,
    running: Arc<RwLock<HashMap<String, RunningJob>>>,
}

impl UploadManager {
    pub fn new(
        repos: Repositories,
        embedder: Arc<dyn EmbeddingBackend>,
        extraction: Arc<ExtractionRegistry>,
        config: IngestConfig,
        events: EventBus,
    ) -> Self {
        let processor = FileProcessor::new(repos.clone(), embedder, extraction, &config);
        let batch = BatchProcessor::new(Arc::new(processor), config.max_concurrent_files)
            .with_events(events.clone());
        Self {
            repos,
            batch: Arc::new(batch),
            config,
            events,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Directory a job's archive is unpacked into.
    pub fn staging_dir_for(&self, job_id: &str) -> PathBuf {
        self.config.staging_dir.join(job_id)
    }

    /// Create a fresh directory under the staging root for files that a
    /// job will reference. It is removed together with the job's staging.
    pub async fn new_staging_area(&self) -> Result<PathBuf> {
        let dir = self
            .config
            .staging_dir
            .join(format!("{}{}", INCOMING_PREFIX, new_v7().simple()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Insert a `pending` job for an existing collection.
    #[instrument(skip(self, source, options), fields(subsystem = "jobs", component = "manager", op = "create_job", collection_id = %collection_id))]
    pub async fn create_job(
        &self,
        collection_id: Uuid,
        source: UploadSource,
        options: JobOptions,
    ) -> Result<UploadJob> {
        if self.repos.collections.get(collection_id).await?.is_none() {
            return Err(Error::CollectionNotFound(collection_id));
        }
        if options.max_file_size_mb == 0 {
            return Err(Error::InvalidInput(
                "max_file_size_mb must be greater than zero".to_string(),
            ));
        }

        let job = self
            .repos
            .upload_jobs
            .create(NewUploadJob {
                job_id: new_upload_job_id(Utc::now()),
                collection_id,
                source,
                options,
            })
            .await?;
        info!(job_id = %job.job_id, source = %job.source.describe(), "Upload job created");
        Ok(job)
    }

    /// Move a `pending` job to `processing` and run it in the background.
    ///
    /// Returns the `processing` snapshot. The file set is resolved and
    /// processed by the spawned task.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "manager", op = "start_job"))]
    pub async fn start_job(&self, job_id: &str) -> Result<UploadJob> {
        // The registry lock spans the status change so cancel_job never sees
        // a `processing` job that is not registered yet.
        let mut running = self.running.write().await;
        let job = self.repos.upload_jobs.mark_processing(job_id).await?;

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        running.insert(
            job.job_id.clone(),
            RunningJob {
                cancel: cancel.clone(),
                done: done.clone(),
            },
        );
        drop(running);

        let manager = self.clone();
        let snapshot = job.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            if let Err(e) = manager.run_job(&job, cancel).await {
                error!(job_id = %job.job_id, error = %e, "Upload job failed");
                manager.fail_job(&job.job_id, &e).await;
            }
            manager.cleanup_staging(&job).await;
            manager.running.write().await.remove(&job.job_id);
            done.cancel();
            info!(
                job_id = %job.job_id,
                duration_ms = started.elapsed().as_millis() as u64,
                "Upload job task ended"
            );
        });

        info!(job_id = %snapshot.job_id, "Upload job started");
        Ok(snapshot)
    }

    /// Create a job and start it.
    pub async fn submit(
        &self,
        collection_id: Uuid,
        source: UploadSource,
        options: JobOptions,
    ) -> Result<UploadJob> {
        let job = self.create_job(collection_id, source, options).await?;
        self.start_job(&job.job_id).await
    }

    async fn run_job(&self, job: &UploadJob, cancel: CancellationToken) -> Result<()> {
        let source = job.source.clone();
        let options = job.options.clone();
        let extract_dir = self.staging_dir_for(&job.job_id);
        let max_files = self.config.max_files_per_job;

        let file_set = tokio::task::spawn_blocking(move || {
            resolve_source(&source, &options, &extract_dir, max_files)
        })
        .await
        .map_err(|e| Error::Internal(format!("Source scan task failed: {}", e)))??;

        debug!(
            job_id = %job.job_id,
            files = file_set.len(),
            issues = file_set.structure.errors.len(),
            "File set resolved"
        );
        self.repos
            .upload_jobs
            .record_file_set(&job.job_id, file_set.len() as i32, file_set.structure)
            .await?;

        self.batch
            .process_batch(
                BatchRequest {
                    collection_id: job.collection_id,
                    job: Some(JobRef {
                        job_id: job.job_id.clone(),
                        id: job.id,
                    }),
                    files: file_set.files,
                    preserve_structure: job.options.preserve_structure,
                    max_file_size_bytes: job.options.max_file_size_bytes(),
                },
                cancel,
                None,
            )
            .await?;
        Ok(())
    }

    /// Record an unexpected job error as a terminal `failed` status.
    async fn fail_job(&self, job_id: &str, cause: &Error) {
        let current = match self.repos.upload_jobs.get(job_id).await {
            Ok(Some(job)) if !job.status.is_terminal() => job,
            Ok(_) => return,
            Err(e) => {
                error!(job_id, error = %e, "Could not load job to mark it failed");
                return;
            }
        };

        let mut error_log = current.error_log.clone();
        error_log.push(ErrorLogEntry {
            file: current.job_id.clone(),
            error: cause.to_string(),
            timestamp: Utc::now(),
        });
        let completion = JobCompletion {
            status: UploadJobStatus::Failed,
            counters: current.counters(),
            error_log,
            successful_paths: current.successful_paths.clone(),
        };
        match self.repos.upload_jobs.finish(job_id, completion).await {
            Ok(job) => self.emit_complete(&job),
            Err(e) => error!(job_id, error = %e, "Failed to mark job as failed"),
        }
    }

    fn emit_complete(&self, job: &UploadJob) {
        self.events.emit(
            &job.job_id,
            ProgressEvent::BatchComplete {
                status: job.status,
                processed: job.processed_files.max(0) as usize,
                successful: job.successful_files.max(0) as usize,
                failed: job.failed_files.max(0) as usize,
                total: job.total_files.max(0) as usize,
            },
        );
    }

    /// Cancel a job.
    ///
    /// A running job stops scheduling files and reaches `cancelled` once its
    /// in-flight files finish; the returned snapshot may still show
    /// `processing`. A job that is not running here is cancelled directly.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "manager", op = "cancel_job"))]
    pub async fn cancel_job(&self, job_id: &str) -> Result<UploadJob> {
        // Held until the direct finish is written so start_job cannot move
        // the job to `processing` in between.
        let running = self.running.write().await;
        let job = self.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: job.status.to_string(),
                to: UploadJobStatus::Cancelled.to_string(),
            });
        }

        if let Some(entry) = running.get(job_id) {
            entry.cancel.cancel();
            info!(job_id, "Cancellation requested for running job");
            return Ok(job);
        }

        let cancelled = self
            .repos
            .upload_jobs
            .finish(
                job_id,
                JobCompletion {
                    status: UploadJobStatus::Cancelled,
                    counters: job.counters(),
                    error_log: job.error_log.clone(),
                    successful_paths: job.successful_paths.clone(),
                },
            )
            .await?;
        drop(running);
        self.cleanup_staging(&cancelled).await;
        self.emit_complete(&cancelled);
        info!(job_id, from = %job.status, "Upload job cancelled");
        Ok(cancelled)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<UploadJob> {
        self.repos
            .upload_jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    /// Jobs of a collection, newest first.
    pub async fn list_jobs(
        &self,
        collection_id: Uuid,
        status: Option<UploadJobStatus>,
        limit: Option<i64>,
    ) -> Result<Vec<UploadJob>> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_JOB_LIST_LIMIT);
        self.repos
            .upload_jobs
            .list(collection_id, status, limit)
            .await
    }

    /// Whether this process is running the job.
    pub async fn is_running(&self, job_id: &str) -> bool {
        self.running.read().await.contains_key(job_id)
    }

    pub async fn running_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until the job's background task has ended, then return the job.
    pub async fn wait_for_completion(&self, job_id: &str, timeout: Duration) -> Result<UploadJob> {
        let done = self
            .running
            .read()
            .await
            .get(job_id)
            .map(|r| r.done.clone());
        if let Some(done) = done {
            tokio::time::timeout(timeout, done.cancelled())
                .await
                .map_err(|_| {
                    Error::Timeout(format!("Job {} still running after {:?}", job_id, timeout))
                })?;
        }
        self.get_job(job_id).await
    }

    /// Staging owned by the job's source: an incoming area under the
    /// staging root. Server-side folders are never owned.
    fn owned_staging(&self, source: &UploadSource) -> Option<PathBuf> {
        let candidate = match source {
            UploadSource::Zip { archive_path } => Path::new(archive_path).parent()?.to_path_buf(),
            UploadSource::Files { root, .. } => PathBuf::from(root),
            UploadSource::Folder { .. } => return None,
        };
        let owned = candidate.starts_with(&self.config.staging_dir)
            && candidate != self.config.staging_dir
            && candidate
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(INCOMING_PREFIX));
        owned.then_some(candidate)
    }

    async fn cleanup_staging(&self, job: &UploadJob) {
        let mut paths = vec![self.staging_dir_for(&job.job_id)];
        paths.extend(self.owned_staging(&job.source));

        for path in paths {
            if tokio::fs::metadata(&path).await.is_err() {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => debug!(job_id = %job.job_id, path = %path.display(), "Staging removed"),
                Err(e) => warn!(
                    job_id = %job.job_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove staging"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::CreateCollectionRequest;
    use lorekeep_db::MemoryStore;
    use lorekeep_inference::mock::MockEmbeddingBackend;
    use tempfile::TempDir;

    async fn manager(staging: &Path) -> (UploadManager, Uuid) {
        let repos = MemoryStore::new().repositories();
        let collection = repos
            .collections
            .create(
                CreateCollectionRequest {
                    name: "handbook".to_string(),
                    description: None,
                    embedding_model: None,
                },
                "mock-embed",
            )
            .await
            .unwrap();
        let manager = UploadManager::new(
            repos,
            Arc::new(MockEmbeddingBackend::new()),
            Arc::new(ExtractionRegistry::with_defaults()),
            IngestConfig::default()
                .with_chunking(200, 0)
                .with_staging_dir(staging),
            EventBus::new(64),
        );
        (manager, collection.id)
    }

    #[tokio::test]
    async fn test_create_job_requires_collection() {
        let tmp = TempDir::new().unwrap();
        let (manager, _) = manager(tmp.path()).await;
        let missing = Uuid::new_v4();
        let err = manager
            .create_job(
                missing,
                UploadSource::Folder {
                    path: "/nowhere".to_string(),
                },
                JobOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_pending_job_cancels_directly() {
        let tmp = TempDir::new().unwrap();
        let (manager, collection_id) = manager(tmp.path()).await;
        let job = manager
            .create_job(
                collection_id,
                UploadSource::Folder {
                    path: tmp.path().display().to_string(),
                },
                JobOptions::default(),
            )
            .await
            .unwrap();
        assert!(job.job_id.starts_with("upload_"));
        assert_eq!(job.status, UploadJobStatus::Pending);

        let cancelled = manager.cancel_job(&job.job_id).await.unwrap();
        assert_eq!(cancelled.status, UploadJobStatus::Cancelled);

        let err = manager.cancel_job(&job.job_id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        let err = manager.start_job(&job.job_id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_racing_start_never_orphans_the_task() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        for i in 0..4 {
            std::fs::write(docs.join(format!("note_{}.txt", i)), format!("Note {} body.", i))
                .unwrap();
        }
        let (manager, collection_id) = manager(&tmp.path().join("staging")).await;

        for _ in 0..25 {
            let job = manager
                .create_job(
                    collection_id,
                    UploadSource::Folder {
                        path: docs.display().to_string(),
                    },
                    JobOptions::default(),
                )
                .await
                .unwrap();

            let starter = manager.clone();
            let canceller = manager.clone();
            let (a, b) = (job.job_id.clone(), job.job_id.clone());
            let start = tokio::spawn(async move { starter.start_job(&a).await });
            let cancel = tokio::spawn(async move { canceller.cancel_job(&b).await });
            let started = start.await.unwrap();
            if let Err(e) = cancel.await.unwrap() {
                // Only possible once the task has already finished the job
                assert!(matches!(e, Error::InvalidTransition { .. }));
                assert!(started.is_ok());
            }

            let finished = manager
                .wait_for_completion(&job.job_id, Duration::from_secs(10))
                .await
                .unwrap();
            assert!(finished.status.is_terminal());
            match started {
                // Cancelled first: nothing ran
                Err(e) => {
                    assert!(matches!(e, Error::InvalidTransition { .. }));
                    assert_eq!(finished.status, UploadJobStatus::Cancelled);
                    assert_eq!(finished.processed_files, 0);
                }
                // Started first: the task itself wrote the terminal row
                Ok(_) => {
                    assert!(finished.completed_at_utc.is_some());
                    assert_eq!(finished.total_files, 4);
                    assert_eq!(
                        finished.processed_files,
                        finished.successful_files + finished.failed_files
                    );
                }
            }
        }
        assert!(manager.running_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_folder_job_runs_to_completion() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(docs.join("guide")).unwrap();
        std::fs::write(docs.join("guide/intro.md"), "# Intro\n\nWelcome aboard. Read this first.").unwrap();
        std::fs::write(docs.join("faq.txt"), "Questions and answers live here.").unwrap();
        std::fs::write(docs.join("logo.bin"), [0u8, 1, 2]).unwrap();

        let (manager, collection_id) = manager(&tmp.path().join("staging")).await;
        let mut events = manager.events().subscribe();
        let job = manager
            .submit(
                collection_id,
                UploadSource::Folder {
                    path: docs.display().to_string(),
                },
                JobOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(job.status, UploadJobStatus::Processing);

        let done = manager
            .wait_for_completion(&job.job_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(done.status, UploadJobStatus::Completed);
        assert_eq!(done.total_files, 2);
        assert_eq!(done.successful_files, 2);
        assert_eq!(done.progress().percentage, 100.0);
        let structure = done.folder_structure.unwrap();
        assert_eq!(structure.errors.len(), 1);
        assert_eq!(structure.errors[0].file, "logo.bin");
        assert!(!manager.is_running(&job.job_id).await);

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.job_id, job.job_id);
            last = Some(event.payload);
        }
        assert!(matches!(
            last,
            Some(ProgressEvent::BatchComplete {
                status: UploadJobStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_folder_marks_job_failed() {
        let tmp = TempDir::new().unwrap();
        let (manager, collection_id) = manager(tmp.path()).await;
        let job = manager
            .submit(
                collection_id,
                UploadSource::Folder {
                    path: tmp.path().join("absent").display().to_string(),
                },
                JobOptions::default(),
            )
            .await
            .unwrap();

        let done = manager
            .wait_for_completion(&job.job_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(done.status, UploadJobStatus::Failed);
        assert_eq!(done.error_log.len(), 1);
        assert_eq!(done.error_log[0].file, job.job_id);
    }

    #[tokio::test]
    async fn test_incoming_staging_removed_after_job() {
        let tmp = TempDir::new().unwrap();
        let (manager, collection_id) = manager(tmp.path()).await;
        let incoming = manager.new_staging_area().await.unwrap();
        std::fs::write(incoming.join("note.txt"), "Staged for ingestion.").unwrap();

        let job = manager
            .submit(
                collection_id,
                UploadSource::Files {
                    root: incoming.display().to_string(),
                    files: vec!["note.txt".to_string()],
                },
                JobOptions::default(),
            )
            .await
            .unwrap();
        let done = manager
            .wait_for_completion(&job.job_id, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(done.successful_paths, vec!["note.txt".to_string()]);
        assert!(!incoming.exists());
        assert!(tmp.path().exists());
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first() {
        let tmp = TempDir::new().unwrap();
        let (manager, collection_id) = manager(tmp.path()).await;
        let source = UploadSource::Folder {
            path: tmp.path().display().to_string(),
        };
        let first = manager
            .create_job(collection_id, source.clone(), JobOptions::default())
            .await
            .unwrap();
        let second = manager
            .create_job(collection_id, source, JobOptions::default())
            .await
            .unwrap();

        let jobs = manager.list_jobs(collection_id, None, None).await.unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.job_id.clone()).collect();
        assert_eq!(ids, vec![second.job_id.clone(), first.job_id.clone()]);

        let pending = manager
            .list_jobs(collection_id, Some(UploadJobStatus::Completed), Some(10))
            .await
            .unwrap();
        assert!(pending.is_empty());
    }
}
