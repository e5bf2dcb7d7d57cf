//! Upload job state machine and progress snapshot.
//!
//! ```text
//! pending ──► processing ──► completed
//!    │             ├───────► failed
//!    └─────────────┴───────► cancelled
//! ```
//!
//! Terminal states never transition further and their counters are frozen.
//! The reported percentage switches meaning with the state: while a job is
//! `processing` it is how far through the queue the batch is; once the job
//! is anything else it is the fraction of files that actually succeeded.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;

/// Status of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl UploadJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadJobStatus::Pending => "pending",
            UploadJobStatus::Processing => "processing",
            UploadJobStatus::Completed => "completed",
            UploadJobStatus::Failed => "failed",
            UploadJobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadJobStatus::Completed | UploadJobStatus::Failed | UploadJobStatus::Cancelled
        )
    }

    /// Whether a job in this state may move to `next`.
    pub fn can_transition_to(&self, next: UploadJobStatus) -> bool {
        use UploadJobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }

    /// States from which a job may move to `self`.
    pub fn predecessors(&self) -> &'static [UploadJobStatus] {
        use UploadJobStatus::*;
        match self {
            Pending => &[],
            Processing => &[Pending],
            Completed | Failed => &[Processing],
            Cancelled => &[Pending, Processing],
        }
    }

    /// Terminal status for a finished batch.
    pub fn for_outcome(cancelled: bool, failed_files: i32) -> Self {
        if cancelled {
            UploadJobStatus::Cancelled
        } else if failed_files == 0 {
            UploadJobStatus::Completed
        } else {
            UploadJobStatus::Failed
        }
    }
}

impl std::fmt::Display for UploadJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadJobStatus::Pending),
            "processing" => Ok(UploadJobStatus::Processing),
            "completed" => Ok(UploadJobStatus::Completed),
            "failed" => Ok(UploadJobStatus::Failed),
            "cancelled" => Ok(UploadJobStatus::Cancelled),
            _ => Err(format!("Unknown upload job status: {}", s)),
        }
    }
}

/// Where the files of a job come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadSource {
    /// A ZIP archive unpacked into the job's staging directory.
    Zip { archive_path: String },
    /// A folder on the server's filesystem.
    Folder { path: String },
    /// Explicit staged files, relative to `root`.
    Files { root: String, files: Vec<String> },
}

impl UploadSource {
    /// Human-readable origin recorded on the job.
    pub fn describe(&self) -> String {
        match self {
            UploadSource::Zip { archive_path } => archive_path.clone(),
            UploadSource::Folder { path } => path.clone(),
            UploadSource::Files { files, .. } => format!("{} files", files.len()),
        }
    }
}

/// Per-job processing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_true")]
    pub preserve_structure: bool,
    #[serde(default = "default_true")]
    pub skip_unsupported: bool,
}

fn default_max_file_size_mb() -> u64 {
    defaults::MAX_FILE_SIZE_MB
}

fn default_true() -> bool {
    true
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_file_size_mb: defaults::MAX_FILE_SIZE_MB,
            preserve_structure: true,
            skip_unsupported: true,
        }
    }
}

impl JobOptions {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// A file skipped or rejected while scanning a job's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub file: String,
    pub reason: String,
}

/// Snapshot of the scanned folder structure, stored on the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderStructure {
    pub root: String,
    pub total_size: u64,
    /// Distinct folder paths containing accepted files.
    pub folders: Vec<String>,
    /// Accepted file count per lowercase extension (`.md`).
    pub file_types: BTreeMap<String, usize>,
    pub errors: Vec<ScanIssue>,
}

/// One failed file in a job's error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub file: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Running counters written back by the batch coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub processed_files: i32,
    pub successful_files: i32,
    pub failed_files: i32,
}

impl JobCounters {
    /// Column-wise maximum of two snapshots. Counters only move forward.
    pub fn merge(self, other: JobCounters) -> JobCounters {
        JobCounters {
            processed_files: self.processed_files.max(other.processed_files),
            successful_files: self.successful_files.max(other.successful_files),
            failed_files: self.failed_files.max(other.failed_files),
        }
    }

    /// `successful + failed <= processed <= total_files`, all non-negative.
    pub fn fits(&self, total_files: i32) -> bool {
        self.successful_files >= 0
            && self.failed_files >= 0
            && self.successful_files + self.failed_files <= self.processed_files
            && self.processed_files <= total_files
    }
}

/// Final state recorded when a job reaches a terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub status: UploadJobStatus,
    pub counters: JobCounters,
    pub error_log: Vec<ErrorLogEntry>,
    pub successful_paths: Vec<String>,
}

/// Request to create an upload job.
#[derive(Debug, Clone)]
pub struct NewUploadJob {
    pub job_id: String,
    pub collection_id: Uuid,
    pub source: UploadSource,
    pub options: JobOptions,
}

/// Persisted unit of batch ingestion work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: Uuid,
    /// External id, `upload_<unix seconds>_<8 hex>`.
    pub job_id: String,
    pub collection_id: Uuid,
    pub status: UploadJobStatus,
    pub total_files: i32,
    pub processed_files: i32,
    pub successful_files: i32,
    pub failed_files: i32,
    pub source: UploadSource,
    pub options: JobOptions,
    pub folder_structure: Option<FolderStructure>,
    pub error_log: Vec<ErrorLogEntry>,
    pub successful_paths: Vec<String>,
    pub created_at_utc: DateTime<Utc>,
    pub started_at_utc: Option<DateTime<Utc>>,
    pub completed_at_utc: Option<DateTime<Utc>>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Externally reported progress of a job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_files: i32,
    pub processed_files: i32,
    pub successful_files: i32,
    pub failed_files: i32,
    pub percentage: f64,
}

/// Percentage of `part` over `total`, rounded to one decimal. Zero when `total` is zero.
pub fn percentage(part: i32, total: i32) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = f64::from(part) / f64::from(total) * 100.0;
    (raw * 10.0).round() / 10.0
}

impl UploadJob {
    pub fn counters(&self) -> JobCounters {
        JobCounters {
            processed_files: self.processed_files,
            successful_files: self.successful_files,
            failed_files: self.failed_files,
        }
    }

    /// Progress as shown to clients.
    ///
    /// While processing: processed over total. Otherwise: successful over total.
    pub fn progress(&self) -> JobProgress {
        let numerator = if self.status == UploadJobStatus::Processing {
            self.processed_files
        } else {
            self.successful_files
        };
        JobProgress {
            total_files: self.total_files,
            processed_files: self.processed_files,
            successful_files: self.successful_files,
            failed_files: self.failed_files,
            percentage: percentage(numerator, self.total_files),
        }
    }

    /// Seconds between start and completion, when both are known.
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at_utc, self.completed_at_utc) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}
