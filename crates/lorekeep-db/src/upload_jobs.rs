//! Upload job repository implementation.
//!
//! Every status change is a guarded `UPDATE ... WHERE status = ANY(...)`
//! built from [`UploadJobStatus::predecessors`], so a regression can never be
//! written even by concurrent callers. When the guard matches nothing the
//! job is re-read to tell "not found" from "invalid transition".

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Error, FolderStructure, JobCompletion, JobCounters, NewUploadJob, Result, UploadJob,
    UploadJobRepository, UploadJobStatus,
};

/// PostgreSQL implementation of UploadJobRepository.
pub struct PgUploadJobRepository {
    pool: Pool<Postgres>,
}

impl PgUploadJobRepository {
    /// Create a new PgUploadJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn transition_error(&self, job_id: &str, to: UploadJobStatus) -> Error {
        match self.get(job_id).await {
            Ok(Some(job)) => Error::InvalidTransition {
                from: job.status.to_string(),
                to: to.to_string(),
            },
            Ok(None) => Error::JobNotFound(job_id.to_string()),
            Err(e) => e,
        }
    }

    /// Explain why a guarded counter write matched no row. `Ok(None)` means
    /// the job has left `allowed` and the write is moot.
    async fn counter_write_error(
        &self,
        job_id: &str,
        allowed: &[UploadJobStatus],
        counters: JobCounters,
    ) -> Result<Option<Error>> {
        match self.get(job_id).await? {
            Some(job) if allowed.contains(&job.status) => Ok(Some(counters_rejected(
                job.total_files,
                job.counters().merge(counters),
            ))),
            Some(_) => Ok(None),
            None => Ok(Some(Error::JobNotFound(job_id.to_string()))),
        }
    }
}

pub(crate) fn counters_rejected(total_files: i32, c: JobCounters) -> Error {
    Error::InvalidInput(format!(
        "counters out of range: processed={} successful={} failed={} total={}",
        c.processed_files, c.successful_files, c.failed_files, total_files
    ))
}

// Applied after the GREATEST merge so the row never violates the table's
// counter CHECK constraints.
const COUNTERS_FIT: &str = "GREATEST(processed_files, $2) <= total_files \
     AND GREATEST(successful_files, $3) + GREATEST(failed_files, $4) \
         <= GREATEST(processed_files, $2)";

const JOB_COLUMNS: &str = "id, job_id, collection_id, status, total_files, processed_files, \
     successful_files, failed_files, source, options, folder_structure, error_log, \
     successful_paths, created_at_utc, started_at_utc, completed_at_utc, updated_at_utc";

fn from_json<T: serde::de::DeserializeOwned>(value: JsonValue) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn row_to_job(r: &PgRow) -> Result<UploadJob> {
    let status: String = r.get("status");
    let folder_structure: Option<JsonValue> = r.get("folder_structure");
    Ok(UploadJob {
        id: r.get("id"),
        job_id: r.get("job_id"),
        collection_id: r.get("collection_id"),
        status: status.parse::<UploadJobStatus>().map_err(Error::Internal)?,
        total_files: r.get("total_files"),
        processed_files: r.get("processed_files"),
        successful_files: r.get("successful_files"),
        failed_files: r.get("failed_files"),
        source: from_json(r.get("source"))?,
        options: from_json(r.get("options"))?,
        folder_structure: folder_structure.map(from_json).transpose()?,
        error_log: from_json(r.get("error_log"))?,
        successful_paths: from_json(r.get("successful_paths"))?,
        created_at_utc: r.get("created_at_utc"),
        started_at_utc: r.get("started_at_utc"),
        completed_at_utc: r.get("completed_at_utc"),
        updated_at_utc: r.get("updated_at_utc"),
    })
}

fn status_strings(statuses: &[UploadJobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl UploadJobRepository for PgUploadJobRepository {
    async fn create(&self, job: NewUploadJob) -> Result<UploadJob> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO upload_job (id, job_id, collection_id, status, source, options,
                                    created_at_utc, updated_at_utc)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6, $6)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(new_v7())
        .bind(&job.job_id)
        .bind(job.collection_id)
        .bind(serde_json::to_value(&job.source)?)
        .bind(serde_json::to_value(&job.options)?)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            crate::collections::map_unique_violation(e, || {
                format!("Upload job {} already exists", job.job_id)
            })
        })?;

        row_to_job(&row)
    }

    async fn get(&self, job_id: &str) -> Result<Option<UploadJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM upload_job WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(
        &self,
        collection_id: Uuid,
        status: Option<UploadJobStatus>,
        limit: i64,
    ) -> Result<Vec<UploadJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM upload_job
             WHERE collection_id = $1 AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY created_at_utc DESC, id DESC
             LIMIT $3"
        ))
        .bind(collection_id)
        .bind(status.map(|s| s.as_str()))
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn mark_processing(&self, job_id: &str) -> Result<UploadJob> {
        let to = UploadJobStatus::Processing;
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "UPDATE upload_job
             SET status = $2, started_at_utc = $3, updated_at_utc = $3
             WHERE job_id = $1 AND status = ANY($4)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(to.as_str())
        .bind(now)
        .bind(status_strings(to.predecessors()))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                info!(subsystem = "db", component = "upload_jobs", job_id, "Upload job processing");
                row_to_job(&row)
            }
            None => Err(self.transition_error(job_id, to).await),
        }
    }

    async fn record_file_set(
        &self,
        job_id: &str,
        total_files: i32,
        structure: FolderStructure,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE upload_job
             SET total_files = $2, folder_structure = $3, updated_at_utc = $4
             WHERE job_id = $1 AND status = 'processing'",
        )
        .bind(job_id)
        .bind(total_files)
        .bind(serde_json::to_value(&structure)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(job_id, UploadJobStatus::Processing).await);
        }
        Ok(())
    }

    async fn set_total_files(&self, job_id: &str, total_files: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE upload_job SET total_files = $2, updated_at_utc = $3
             WHERE job_id = $1 AND status = 'processing' AND processed_files <= $2",
        )
        .bind(job_id)
        .bind(total_files)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(match self.get(job_id).await? {
                Some(job) if job.status == UploadJobStatus::Processing => {
                    counters_rejected(total_files, job.counters())
                }
                _ => self.transition_error(job_id, UploadJobStatus::Processing).await,
            });
        }
        Ok(())
    }

    async fn update_progress(&self, job_id: &str, counters: JobCounters) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE upload_job
             SET processed_files = GREATEST(processed_files, $2),
                 successful_files = GREATEST(successful_files, $3),
                 failed_files = GREATEST(failed_files, $4),
                 updated_at_utc = $5
             WHERE job_id = $1 AND status = 'processing' AND {COUNTERS_FIT}"
        ))
        .bind(job_id)
        .bind(counters.processed_files)
        .bind(counters.successful_files)
        .bind(counters.failed_files)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            if let Some(e) = self
                .counter_write_error(job_id, &[UploadJobStatus::Processing], counters)
                .await?
            {
                // Progress writes for unknown or finished jobs are ignored.
                if !matches!(e, Error::JobNotFound(_)) {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn finish(&self, job_id: &str, completion: JobCompletion) -> Result<UploadJob> {
        let to = completion.status;
        if !to.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "finish requires a terminal status, got {}",
                to
            )));
        }
        let now = Utc::now();
        let c = completion.counters;

        let row = sqlx::query(&format!(
            "UPDATE upload_job
             SET status = $5,
                 processed_files = GREATEST(processed_files, $2),
                 successful_files = GREATEST(successful_files, $3),
                 failed_files = GREATEST(failed_files, $4),
                 error_log = $6, successful_paths = $7,
                 completed_at_utc = $8, updated_at_utc = $8
             WHERE job_id = $1 AND status = ANY($9) AND {COUNTERS_FIT}
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(c.processed_files)
        .bind(c.successful_files)
        .bind(c.failed_files)
        .bind(to.as_str())
        .bind(serde_json::to_value(&completion.error_log)?)
        .bind(serde_json::to_value(&completion.successful_paths)?)
        .bind(now)
        .bind(status_strings(to.predecessors()))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        match row {
            Some(row) => {
                let job = row_to_job(&row)?;
                info!(
                    subsystem = "db",
                    component = "upload_jobs",
                    job_id,
                    status = %job.status,
                    processed_files = job.processed_files,
                    successful_files = job.successful_files,
                    failed_files = job.failed_files,
                    "Upload job finished"
                );
                Ok(job)
            }
            None => match self
                .counter_write_error(job_id, to.predecessors(), c)
                .await?
            {
                Some(e) => Err(e),
                None => Err(self.transition_error(job_id, to).await),
            },
        }
    }
}
