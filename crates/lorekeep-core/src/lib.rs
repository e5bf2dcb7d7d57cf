//! # lorekeep-core
//!
//! Core types, traits, and abstractions for lorekeep.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the storage, inference, ingestion and API crates depend on.

pub mod defaults;
pub mod error;
pub mod events;
pub mod file_safety;
pub mod hashing;
pub mod ids;
pub mod logging;
pub mod models;
pub mod paths;
pub mod traits;
pub mod upload_job;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, JobEvent, ProgressEvent};
pub use file_safety::{detect_mime_type, sanitize_filename, SUPPORTED_EXTENSIONS};
pub use ids::{new_upload_job_id, new_v7};
pub use models::*;
pub use traits::*;
pub use upload_job::*;
