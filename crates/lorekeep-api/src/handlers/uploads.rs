//! Upload endpoints, job status and progress streaming.
//!
//! Uploaded bytes are streamed into a fresh staging area. Once the job is
//! submitted the upload manager owns that area and removes it when the job
//! ends; before that, any failure here removes it.

use std::collections::HashSet;
use std::convert::Infallible;
use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt as _;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lorekeep_core::file_safety::{sanitize_filename, sanitize_relative_path};
use lorekeep_core::{
    defaults, Error, JobEvent, JobOptions, JobProgress, UploadJob, UploadJobStatus, UploadSource,
};
use lorekeep_jobs::UploadManager;

use crate::error::ApiError;
use crate::handlers::collections::require_collection;
use crate::state::AppState;

// =============================================================================
// RESPONSE TYPES
// =============================================================================

/// Response for an accepted upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadAccepted {
    pub job_id: String,
    pub status: String,
    pub collection_id: Uuid,
    pub source: String,
}

impl From<&UploadJob> for UploadAccepted {
    fn from(job: &UploadJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: "accepted".to_string(),
            collection_id: job.collection_id,
            source: job.source.describe(),
        }
    }
}

/// Job snapshot with the derived progress and duration.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: UploadJob,
    pub progress: JobProgress,
    pub duration_seconds: Option<f64>,
}

impl From<UploadJob> for JobView {
    fn from(job: UploadJob) -> Self {
        Self {
            progress: job.progress(),
            duration_seconds: job.duration_seconds(),
            job,
        }
    }
}

// =============================================================================
// MULTIPART HELPERS
// =============================================================================

fn multipart_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(format!("Multipart error: {}", e))
}

/// Stream one multipart file field to `dest`, returning the bytes written.
async fn save_field(mut field: Field<'_>, dest: &FsPath) -> Result<u64, ApiError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "Invalid value for {}: {}",
            name, other
        ))),
    }
}

/// Apply a text field to the job options. Returns false for unknown names.
async fn apply_option(
    options: &mut JobOptions,
    name: &str,
    field: Field<'_>,
) -> Result<bool, ApiError> {
    if !matches!(name, "preserve_structure" | "skip_unsupported" | "max_file_size_mb") {
        return Ok(false);
    }
    let value = field.text().await.map_err(multipart_error)?;
    match name {
        "preserve_structure" => options.preserve_structure = parse_flag(name, &value)?,
        "skip_unsupported" => options.skip_unsupported = parse_flag(name, &value)?,
        _ => {
            options.max_file_size_mb = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|mb| *mb > 0)
                .ok_or_else(|| {
                    ApiError::BadRequest(format!("Invalid max_file_size_mb: {}", value.trim()))
                })?;
        }
    }
    Ok(true)
}

async fn remove_staging(dir: &FsPath) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(path = %dir.display(), error = %e, "Failed to remove staging after rejected upload");
    }
}

// =============================================================================
// UPLOAD HANDLERS
// =============================================================================

/// Upload a ZIP archive of a folder.
///
/// # Multipart Fields
/// - `file`: the `.zip` archive (required)
/// - `preserve_structure`, `skip_unsupported`: booleans (optional, default true)
/// - `max_file_size_mb`: per-file limit (optional)
///
/// Returns 202 with the job id; processing continues in the background.
pub async fn upload_folder(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), ApiError> {
    require_collection(&state, collection_id).await?;
    let staging = state.manager.new_staging_area().await?;

    match accept_archive(&state, collection_id, &staging, multipart).await {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(UploadAccepted::from(&job)))),
        Err(e) => {
            remove_staging(&staging).await;
            Err(e)
        }
    }
}

async fn accept_archive(
    state: &AppState,
    collection_id: Uuid,
    staging: &FsPath,
    mut multipart: Multipart,
) -> Result<UploadJob, ApiError> {
    let mut options = JobOptions::default();
    let mut archive: Option<(PathBuf, u64)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            if !filename.to_ascii_lowercase().ends_with(".zip") {
                return Err(ApiError::BadRequest(format!(
                    "Only ZIP archives are accepted, got '{}'",
                    filename
                )));
            }
            let dest = staging.join(sanitize_filename(&filename));
            let written = save_field(field, &dest).await?;
            archive = Some((dest, written));
        } else if !apply_option(&mut options, &name, field).await? {
            debug!(field = %name, "Ignoring unknown multipart field");
        }
    }

    let (path, size) =
        archive.ok_or_else(|| ApiError::BadRequest("Missing file in multipart form".to_string()))?;
    if size == 0 {
        return Err(ApiError::BadRequest("Archive is empty".to_string()));
    }

    let job = state
        .manager
        .submit(
            collection_id,
            UploadSource::Zip {
                archive_path: path.display().to_string(),
            },
            options,
        )
        .await?;
    info!(job_id = %job.job_id, collection_id = %collection_id, bytes = size, "Folder archive accepted");
    Ok(job)
}

/// Upload individual files.
///
/// # Multipart Fields
/// - `files` (repeated): each part's filename is its relative path, so a
///   browser folder upload keeps its structure
/// - `preserve_structure`, `skip_unsupported`, `max_file_size_mb` as for
///   [`upload_folder`]
pub async fn upload_batch(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), ApiError> {
    require_collection(&state, collection_id).await?;
    let staging = state.manager.new_staging_area().await?;

    match accept_files(&state, collection_id, &staging, multipart).await {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(UploadAccepted::from(&job)))),
        Err(e) => {
            remove_staging(&staging).await;
            Err(e)
        }
    }
}

async fn accept_files(
    state: &AppState,
    collection_id: Uuid,
    staging: &FsPath,
    mut multipart: Multipart,
) -> Result<UploadJob, ApiError> {
    let max_files = state.config.max_batch_files;
    let mut options = JobOptions::default();
    let mut files: Vec<String> = Vec::new();
    let mut seen = HashSet::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" || name == "file" {
            let raw = field.file_name().unwrap_or_default().to_string();
            let relative = sanitize_relative_path(&raw)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid file path: '{}'", raw)))?;
            if !seen.insert(relative.clone()) {
                return Err(ApiError::BadRequest(format!("Duplicate file path: {}", relative)));
            }
            if files.len() >= max_files {
                return Err(ApiError::BadRequest(format!(
                    "Too many files: at most {} per batch",
                    max_files
                )));
            }
            save_field(field, &staging.join(&relative)).await?;
            files.push(relative);
        } else if !apply_option(&mut options, &name, field).await? {
            debug!(field = %name, "Ignoring unknown multipart field");
        }
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No files in upload".to_string()));
    }

    let count = files.len();
    let job = state
        .manager
        .submit(
            collection_id,
            UploadSource::Files {
                root: staging.display().to_string(),
                files,
            },
            options,
        )
        .await?;
    info!(job_id = %job.job_id, collection_id = %collection_id, file_count = count, "File batch accepted");
    Ok(job)
}

// =============================================================================
// JOB HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// Load a job of this collection. Jobs of other collections are 404.
async fn load_job(state: &AppState, collection_id: Uuid, job_id: &str) -> Result<UploadJob, ApiError> {
    let job = state.manager.get_job(job_id).await?;
    if job.collection_id != collection_id {
        return Err(Error::JobNotFound(job_id.to_string()).into());
    }
    Ok(job)
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    require_collection(&state, collection_id).await?;
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse::<UploadJobStatus>())
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = query.limit.map(|l| l.clamp(1, 500));

    let jobs = state
        .manager
        .list_jobs(collection_id, status, limit)
        .await?;
    Ok(Json(jobs.into_iter().map(JobView::from).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path((collection_id, job_id)): Path<(Uuid, String)>,
) -> Result<Json<JobView>, ApiError> {
    Ok(Json(load_job(&state, collection_id, &job_id).await?.into()))
}

/// Cancel a job. Running jobs finish their in-flight files first.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path((collection_id, job_id)): Path<(Uuid, String)>,
) -> Result<Json<JobView>, ApiError> {
    load_job(&state, collection_id, &job_id).await?;
    Ok(Json(state.manager.cancel_job(&job_id).await?.into()))
}

// =============================================================================
// PROGRESS STREAM
// =============================================================================

fn sse_event<T: Serialize>(name: &str, value: &T) -> Event {
    let data = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

enum Phase {
    Snapshot(UploadJob, BroadcastStream<JobEvent>),
    Listen(BroadcastStream<JobEvent>),
    Complete(UploadJob),
    Done,
}

/// Ordered events for one job: a `job_status` snapshot, forwarded progress
/// events, then `job_complete` with the terminal snapshot.
fn job_event_stream(
    manager: UploadManager,
    job: UploadJob,
    events: BroadcastStream<JobEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let job_id = job.job_id.clone();
    stream::unfold(Phase::Snapshot(job, events), move |phase| {
        let manager = manager.clone();
        let job_id = job_id.clone();
        async move {
            match phase {
                Phase::Snapshot(job, events) => {
                    let event = sse_event("job_status", &JobView::from(job.clone()));
                    let next = if job.status.is_terminal() {
                        Phase::Complete(job)
                    } else {
                        Phase::Listen(events)
                    };
                    Some((Ok(event), next))
                }
                Phase::Listen(mut events) => loop {
                    match events.next().await {
                        Some(Ok(event)) if event.job_id == job_id => {
                            let next = if event.payload.is_terminal() {
                                match manager.get_job(&job_id).await {
                                    Ok(job) => Phase::Complete(job),
                                    Err(_) => Phase::Done,
                                }
                            } else {
                                Phase::Listen(events)
                            };
                            let sse = sse_event(event.payload.event_type(), &event);
                            return Some((Ok(sse), next));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                            warn!(job_id = %job_id, missed, "Progress stream lagged; resending snapshot");
                            let job = manager.get_job(&job_id).await.ok()?;
                            let sse = sse_event("job_status", &JobView::from(job.clone()));
                            let next = if job.status.is_terminal() {
                                Phase::Complete(job)
                            } else {
                                Phase::Listen(events)
                            };
                            return Some((Ok(sse), next));
                        }
                        None => return None,
                    }
                },
                Phase::Complete(job) => {
                    Some((Ok(sse_event("job_complete", &JobView::from(job))), Phase::Done))
                }
                Phase::Done => None,
            }
        }
    })
}

/// Server-Sent Events for one job until it reaches a terminal status.
pub async fn stream_job(
    State(state): State<AppState>,
    Path((collection_id, job_id)): Path<(Uuid, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before reading the snapshot so no event falls in between
    let events = BroadcastStream::new(state.manager.events().subscribe());
    let job = load_job(&state, collection_id, &job_id).await?;

    Ok(Sse::new(job_event_stream(state.manager.clone(), job, events)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(defaults::SSE_KEEPALIVE_SECS))
            .text("keepalive"),
    ))
}
