//! Centralized default constants for lorekeep.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration loaders (`IngestConfig::from_env`, `OllamaBackend::from_env`,
//! `ServerConfig::from_env`) fall back to these when a variable is unset.

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk for text splitting.
pub const CHUNK_SIZE: usize = 1000;

/// Overlap characters carried from the end of one chunk into the next.
pub const CHUNK_OVERLAP: usize = 200;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding vector dimension for nomic-embed-text.
pub const EMBED_DIMENSION: usize = 768;

/// Per-call deadline for an embedding request.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Attempts per chunk before the chunk is marked failed.
pub const EMBED_MAX_ATTEMPTS: u32 = 3;

/// Base backoff between embedding attempts. Doubles per attempt.
pub const EMBED_BACKOFF_MS: u64 = 2000;

/// Embedding calls slower than this are logged with `slow = true`.
pub const EMBED_SLOW_MS: u64 = 5000;

// =============================================================================
// INGESTION
// =============================================================================

/// Files processed concurrently within one batch.
pub const MAX_CONCURRENT_FILES: usize = 3;

/// Largest accepted file.
pub const MAX_FILE_SIZE_MB: u64 = 500;

/// Cap on files taken from a scanned folder or archive.
pub const MAX_FILES_PER_JOB: usize = 1000;

/// Cap on the bytes one ZIP archive may expand to when unpacked.
pub const MAX_ARCHIVE_UNPACKED_MB: u64 = 4096;

/// Cap on files accepted by a single multi-file upload request.
pub const MAX_BATCH_FILES: usize = 100;

/// Read buffer for streaming content hashing.
pub const HASH_BUFFER_BYTES: usize = 64 * 1024;

/// Staging directory name created under the system temp dir.
pub const STAGING_DIR_NAME: &str = "lorekeep-uploads";

// =============================================================================
// SEARCH
// =============================================================================

/// Default number of matches returned by vector search.
pub const SEARCH_LIMIT: i64 = 10;

/// Default minimum cosine similarity for vector search matches.
pub const SEARCH_SCORE_THRESHOLD: f32 = 0.7;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for list endpoints (jobs, documents).
pub const PAGE_LIMIT: i64 = 50;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast capacity of the progress event bus.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// SSE keep-alive interval.
pub const SSE_KEEPALIVE_SECS: u64 = 15;
