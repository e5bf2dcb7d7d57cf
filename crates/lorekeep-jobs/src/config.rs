//! Ingestion pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use lorekeep_core::defaults;
use lorekeep_db::ChunkerConfig;
use lorekeep_inference::RetryPolicy;

/// Tunables for the batch ingestion pipeline.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Files processed concurrently within one batch.
    pub max_concurrent_files: usize,
    /// Default per-file size cap for jobs that do not override it.
    pub max_file_size_mb: u64,
    /// Cap on files taken from a scanned folder or archive.
    pub max_files_per_job: usize,
    /// Sentence chunker settings.
    pub chunker: ChunkerConfig,
    /// Deadline and retry policy for each embedding call.
    pub retry: RetryPolicy,
    /// Root under which per-job staging directories are created.
    pub staging_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: defaults::MAX_CONCURRENT_FILES,
            max_file_size_mb: defaults::MAX_FILE_SIZE_MB,
            max_files_per_job: defaults::MAX_FILES_PER_JOB,
            chunker: ChunkerConfig::default(),
            retry: RetryPolicy::default(),
            staging_dir: std::env::temp_dir().join(defaults::STAGING_DIR_NAME),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl IngestConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LOREKEEP_MAX_CONCURRENT_FILES` | `3` | Files in flight per batch |
    /// | `LOREKEEP_MAX_FILE_SIZE_MB` | `500` | Per-file size cap |
    /// | `LOREKEEP_MAX_FILES_PER_JOB` | `1000` | Files taken from a folder or archive |
    /// | `LOREKEEP_CHUNK_SIZE` | `1000` | Max characters per chunk |
    /// | `LOREKEEP_CHUNK_OVERLAP` | `200` | Characters carried into the next chunk |
    /// | `LOREKEEP_EMBED_MAX_ATTEMPTS` | `3` | Attempts per embedding call |
    /// | `LOREKEEP_EMBED_BACKOFF_MS` | `2000` | Base backoff, doubled per attempt |
    /// | `LOREKEEP_EMBED_TIMEOUT_SECS` | `30` | Deadline per embedding attempt |
    /// | `LOREKEEP_STAGING_DIR` | `$TMPDIR/lorekeep-uploads` | Staging root |
    pub fn from_env() -> Self {
        let base = Self::default();

        let max_concurrent_files = env_parse("LOREKEEP_MAX_CONCURRENT_FILES")
            .unwrap_or(base.max_concurrent_files)
            .max(1);
        let max_file_size_mb =
            env_parse("LOREKEEP_MAX_FILE_SIZE_MB").unwrap_or(base.max_file_size_mb);
        let max_files_per_job = env_parse("LOREKEEP_MAX_FILES_PER_JOB")
            .unwrap_or(base.max_files_per_job)
            .max(1);

        let max_chunk_size = env_parse("LOREKEEP_CHUNK_SIZE")
            .unwrap_or(base.chunker.max_chunk_size)
            .max(1);
        let overlap = env_parse::<usize>("LOREKEEP_CHUNK_OVERLAP")
            .unwrap_or(base.chunker.overlap)
            .min(max_chunk_size.saturating_sub(1));

        let retry = RetryPolicy::new(
            env_parse("LOREKEEP_EMBED_MAX_ATTEMPTS").unwrap_or(base.retry.max_attempts),
            env_parse("LOREKEEP_EMBED_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.retry.backoff),
            env_parse("LOREKEEP_EMBED_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.retry.timeout),
        );

        let staging_dir = std::env::var("LOREKEEP_STAGING_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(base.staging_dir);

        Self {
            max_concurrent_files,
            max_file_size_mb,
            max_files_per_job,
            chunker: ChunkerConfig {
                max_chunk_size,
                overlap,
            },
            retry,
            staging_dir,
        }
    }

    /// Set the number of files processed concurrently.
    pub fn with_max_concurrent_files(mut self, n: usize) -> Self {
        self.max_concurrent_files = n.max(1);
        self
    }

    /// Set the default per-file size cap.
    pub fn with_max_file_size_mb(mut self, mb: u64) -> Self {
        self.max_file_size_mb = mb;
        self
    }

    /// Set the cap on files per job.
    pub fn with_max_files_per_job(mut self, n: usize) -> Self {
        self.max_files_per_job = n.max(1);
        self
    }

    /// Set chunk size and overlap.
    pub fn with_chunking(mut self, max_chunk_size: usize, overlap: usize) -> Self {
        self.chunker = ChunkerConfig {
            max_chunk_size,
            overlap,
        };
        self
    }

    /// Set the embedding retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the staging root.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }
}
