//! Structured logging schema and field name constants for lorekeep.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can filter an upload job end to end (API request,
//! batch coordinator, per-file processor, embedding calls) by the same keys.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A job could not run to a terminal state normally, operator attention needed |
//! | WARN  | Degraded path taken (vector removal failed, stats rebuild failed, chunk retries exhausted) |
//! | INFO  | Job lifecycle: created, started, completed, cancelled |
//! | DEBUG | Per-file decisions: dedup retirement, detected format, chunk counts |
//! | TRACE | Per-chunk iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → job → sub-calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "batch", "file_processor", "folders", "ollama", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "process_batch", "ensure_paths", "embed_texts", "retire"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// External upload job id (`upload_<ts>_<hex>`).
pub const JOB_ID: &str = "job_id";

/// Collection UUID.
pub const COLLECTION_ID: &str = "collection_id";

/// Document UUID.
pub const DOCUMENT_ID: &str = "document_id";

/// Relative path of the file being processed.
pub const FILE: &str = "file";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of chunks produced or stored.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of files in a batch.
pub const FILE_COUNT: &str = "file_count";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Number of database pool connections.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle pool connections.
pub const POOL_IDLE: &str = "pool_idle";

/// Embedding model name.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Whether the operation succeeded.
pub const SUCCESS: &str = "success";

/// Error message text.
pub const ERROR_MSG: &str = "error";

/// Flag set on operations slower than their expected budget.
pub const SLOW: &str = "slow";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_snake_case() {
        for name in [
            REQUEST_ID,
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            JOB_ID,
            COLLECTION_ID,
            DOCUMENT_ID,
            FILE,
            DURATION_MS,
            CHUNK_COUNT,
            FILE_COUNT,
            ATTEMPT,
            POOL_SIZE,
            POOL_IDLE,
            MODEL,
            SUCCESS,
            ERROR_MSG,
            SLOW,
        ] {
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
