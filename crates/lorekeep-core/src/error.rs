//! Error types for lorekeep.

use thiserror::Error;

/// Result type alias using lorekeep's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for lorekeep operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Collection not found
    #[error("Collection not found: {0}")]
    CollectionNotFound(uuid::Uuid),

    /// Upload job not found (external job id)
    #[error("Upload job not found: {0}")]
    JobNotFound(String),

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Upload job status may not move from `from` to `to`
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// No extractor is registered for the detected format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// File exceeds the configured size limit
    #[error("File too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    /// Text extraction failed
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Embedding generation failed and repeating the call will not help
    /// (unknown model, malformed response, rejected input)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Embedding backend is overloaded or temporarily failing (5xx, 429)
    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// External call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Vector index operation failed
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Uniqueness conflict (duplicate collection name, duplicate content)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry of the same call may succeed.
    ///
    /// Only backend-side outages qualify: timeouts, connection errors and
    /// overloaded providers. A backend that answered with a definite
    /// rejection, or any validation or persistence error, never does.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_) | Error::Timeout(_) | Error::Request(_)
        )
    }

    /// Whether the error is a fatal lookup failure that must abort the caller
    /// before any partial work happens.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CollectionNotFound(_) | Error::JobNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_collection_not_found() {
        let id = Uuid::nil();
        let err = Error::CollectionNotFound(id);
        assert_eq!(err.to_string(), format!("Collection not found: {}", id));
    }

    #[test]
    fn test_error_display_job_not_found() {
        let err = Error::JobNotFound("upload_1_abcd1234".to_string());
        assert_eq!(err.to_string(), "Upload job not found: upload_1_abcd1234");
    }

    #[test]
    fn test_error_display_invalid_transition() {
        let err = Error::InvalidTransition {
            from: "completed".to_string(),
            to: "processing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid job transition: completed -> processing"
        );
    }

    #[test]
    fn test_error_display_file_too_large() {
        let err = Error::FileTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "File too large: 2048 bytes (limit 1024 bytes)"
        );
    }

    #[test]
    fn test_error_display_unsupported_format() {
        let err = Error::UnsupportedFormat("application/x-msdownload".to_string());
        assert_eq!(
            err.to_string(),
            "Unsupported format: application/x-msdownload"
        );
    }

    #[test]
    fn test_error_display_embedding() {
        let err = Error::Embedding("failed to generate".to_string());
        assert_eq!(err.to_string(), "Embedding error: failed to generate");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout("embedding call after 30s".to_string());
        assert_eq!(err.to_string(), "Timed out: embedding call after 30s");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::EmbeddingUnavailable("503 loading".into()).is_transient());
        assert!(!Error::Embedding("model \"nope\" not found".into()).is_transient());
        assert!(Error::Timeout("slow".into()).is_transient());
        assert!(Error::Request("reset".into()).is_transient());
        assert!(!Error::InvalidInput("bad".into()).is_transient());
        assert!(!Error::Extraction("corrupt".into()).is_transient());
        assert!(!Error::VectorIndex("down".into()).is_transient());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::CollectionNotFound(Uuid::nil()).is_fatal());
        assert!(Error::JobNotFound("x".into()).is_fatal());
        assert!(!Error::Extraction("corrupt".into()).is_fatal());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
