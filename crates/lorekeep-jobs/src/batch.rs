//! Batch coordinator: bounded fan-out over the per-file processor.
//!
//! Files are started in list order under a semaphore and reported in
//! completion order. The coordinator's loop is the only writer of the
//! running counters, the error log and the job row; file tasks only
//! return their [`FileOutcome`].
//!
//! ```text
//! ensure folder nodes ─┬─> spawn file (permit) ──> outcome ─┬─> counters / events / job row
//!                      └─> ... up to max_concurrent ...     ┘
//!                           rebuild folder + collection statistics ─> terminal status
//! ```

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use lorekeep_core::paths::distinct_folders;
use lorekeep_core::upload_job::percentage;
use lorekeep_core::{
    ErrorLogEntry, EventBus, JobCompletion, JobCounters, ProgressEvent, Result, UploadJobStatus,
};
use lorekeep_db::Repositories;

use crate::processor::{FileContext, FileOutcome, FileProcessor};
use crate::scan::IngestFile;

/// Observer invoked synchronously for every progress event of a batch.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Identity of the upload job a batch reports to.
#[derive(Debug, Clone)]
pub struct JobRef {
    /// External job id (`upload_<ts>_<hex>`).
    pub job_id: String,
    /// Row id, recorded on documents and folder nodes.
    pub id: Uuid,
}

/// One batch of files for one collection.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub collection_id: Uuid,
    pub job: Option<JobRef>,
    pub files: Vec<IngestFile>,
    pub preserve_structure: bool,
    pub max_file_size_bytes: u64,
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub status: UploadJobStatus,
    pub total: usize,
    pub counters: JobCounters,
    /// Per-file outcomes in completion order.
    pub outcomes: Vec<FileOutcome>,
    pub error_log: Vec<ErrorLogEntry>,
    pub successful_paths: Vec<String>,
    pub avg_processing_ms: u64,
    pub cancelled: bool,
}

/// Fans progress events out to the callback and the event bus.
struct Reporter<'a> {
    job_id: Option<&'a str>,
    events: Option<&'a EventBus>,
    callback: Option<ProgressCallback>,
}

impl Reporter<'_> {
    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(&event);
        }
        if let (Some(bus), Some(job_id)) = (self.events, self.job_id) {
            bus.emit(job_id, event);
        }
    }
}

/// Runs batches of files through a shared [`FileProcessor`].
pub struct BatchProcessor {
    processor: Arc<FileProcessor>,
    repos: Repositories,
    events: Option<EventBus>,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(processor: Arc<FileProcessor>, max_concurrent: usize) -> Self {
        Self {
            repos: processor.repositories().clone(),
            processor,
            events: None,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Publish job-scoped progress on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Process every file of the request and record the outcome.
    ///
    /// File failures never abort the batch. An error is returned only when
    /// the folder nodes cannot be created up front or the job row cannot be
    /// moved to its terminal status.
    #[instrument(
        skip(self, request, cancel, on_progress),
        fields(
            subsystem = "jobs",
            component = "batch",
            op = "process_batch",
            collection_id = %request.collection_id,
            job_id = request.job.as_ref().map(|j| j.job_id.as_str()).unwrap_or(""),
            file_count = request.files.len(),
        )
    )]
    pub async fn process_batch(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<BatchResult> {
        let total = request.files.len();
        let collection_id = request.collection_id;
        let job_row_id = request.job.as_ref().map(|j| j.id);

        if let Some(job) = &request.job {
            self.repos
                .upload_jobs
                .set_total_files(&job.job_id, total as i32)
                .await?;
        }

        if request.preserve_structure {
            let folders = distinct_folders(request.files.iter().map(|f| f.relative_path.as_str()));
            if !folders.is_empty() {
                let created = self
                    .repos
                    .hierarchy()
                    .ensure_paths(collection_id, job_row_id, &folders)
                    .await?;
                debug!(folders = folders.len(), created = created.len(), "Folder nodes ready");
            }
        }

        let reporter = Reporter {
            job_id: request.job.as_ref().map(|j| j.job_id.as_str()),
            events: self.events.as_ref(),
            callback: on_progress,
        };
        let ctx = Arc::new(FileContext {
            collection_id,
            upload_job_id: job_row_id,
            preserve_structure: request.preserve_structure,
            max_file_size_bytes: request.max_file_size_bytes,
        });

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut in_flight = FuturesUnordered::new();
        let mut next = 0usize;

        let mut counters = JobCounters::default();
        let mut outcomes = Vec::with_capacity(total);
        let mut error_log = Vec::new();
        let mut successful_paths = Vec::new();
        let mut total_ms = 0u64;

        loop {
            tokio::select! {
                biased;

                Some((index, joined)) = in_flight.next(), if !in_flight.is_empty() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let file: &IngestFile = &request.files[index];
                            warn!(file = %file.relative_path, error = %e, "File task aborted");
                            FileOutcome {
                                file: file.relative_path.clone(),
                                success: false,
                                document_id: None,
                                chunks_stored: 0,
                                chunks_failed: 0,
                                error: Some(format!("File task aborted: {}", e)),
                                duration_ms: 0,
                                replaced: None,
                            }
                        }
                    };

                    counters.processed_files += 1;
                    total_ms += outcome.duration_ms;
                    match (outcome.success, outcome.document_id, &outcome.error) {
                        (true, Some(document_id), _) => {
                            counters.successful_files += 1;
                            successful_paths.push(outcome.file.clone());
                            reporter.emit(ProgressEvent::FileComplete {
                                file: outcome.file.clone(),
                                index,
                                document_id,
                                chunks_stored: outcome.chunks_stored,
                                chunks_failed: outcome.chunks_failed,
                                duration_ms: outcome.duration_ms,
                            });
                        }
                        (_, _, error) => {
                            let error = error.clone().unwrap_or_else(|| "Unknown error".to_string());
                            counters.failed_files += 1;
                            error_log.push(ErrorLogEntry {
                                file: outcome.file.clone(),
                                error: error.clone(),
                                timestamp: Utc::now(),
                            });
                            reporter.emit(ProgressEvent::FileError {
                                file: outcome.file.clone(),
                                index,
                                error,
                                duration_ms: outcome.duration_ms,
                            });
                        }
                    }

                    let processed = counters.processed_files as usize;
                    reporter.emit(ProgressEvent::BatchProgress {
                        processed,
                        total,
                        successful: counters.successful_files as usize,
                        failed: counters.failed_files as usize,
                        percentage: percentage(counters.processed_files, total as i32),
                        avg_processing_ms: total_ms / processed as u64,
                    });
                    if let Some(job) = &request.job {
                        if let Err(e) = self.repos.upload_jobs.update_progress(&job.job_id, counters).await {
                            warn!(error = %e, "Progress write failed");
                        }
                    }
                    outcomes.push(outcome);
                }

                permit = semaphore.clone().acquire_owned(), if next < total && !cancel.is_cancelled() => {
                    let Ok(permit) = permit else { break };
                    if cancel.is_cancelled() {
                        continue;
                    }
                    let index = next;
                    next += 1;

                    let file = request.files[index].clone();
                    reporter.emit(ProgressEvent::FileStart {
                        file: file.relative_path.clone(),
                        index,
                        total,
                    });

                    let processor = self.processor.clone();
                    let ctx = ctx.clone();
                    let handle = tokio::spawn(async move {
                        let _permit = permit;
                        processor.process(&file, &ctx).await
                    });
                    in_flight.push(async move { (index, handle.await) });
                }

                else => break,
            }
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            info!(started = next, total, "Batch cancelled; unstarted files skipped");
        }

        if let Err(e) = self.repos.hierarchy().rebuild_statistics(collection_id).await {
            warn!(error = %e, "Folder statistics rebuild failed");
        }
        if let Err(e) = self.repos.collections.rebuild_statistics(collection_id).await {
            warn!(error = %e, "Collection statistics rebuild failed");
        }

        let status = UploadJobStatus::for_outcome(cancelled, counters.failed_files);
        if let Some(job) = &request.job {
            self.repos
                .upload_jobs
                .finish(
                    &job.job_id,
                    JobCompletion {
                        status,
                        counters,
                        error_log: error_log.clone(),
                        successful_paths: successful_paths.clone(),
                    },
                )
                .await?;
        }

        reporter.emit(ProgressEvent::BatchComplete {
            status,
            processed: counters.processed_files as usize,
            successful: counters.successful_files as usize,
            failed: counters.failed_files as usize,
            total,
        });

        let avg_processing_ms = match counters.processed_files {
            0 => 0,
            n => total_ms / n as u64,
        };
        info!(
            status = %status,
            processed = counters.processed_files,
            successful = counters.successful_files,
            failed = counters.failed_files,
            avg_processing_ms,
            "Batch finished"
        );

        Ok(BatchResult {
            status,
            total,
            counters,
            outcomes,
            error_log,
            successful_paths,
            avg_processing_ms,
            cancelled,
        })
    }
}
