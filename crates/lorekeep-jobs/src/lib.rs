//! # lorekeep-jobs
//!
//! Batch document ingestion for lorekeep.
//!
//! This crate provides:
//! - Text extraction with per-format adapter fallback chains
//! - Folder scanning and ZIP unpacking with path-traversal protection
//! - The per-file pipeline: validate, dedupe, extract, chunk, embed, index
//! - Bounded-concurrency batches with cancellation and progress events
//! - Upload job lifecycle management with staging cleanup
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lorekeep_jobs::{ExtractionRegistry, IngestConfig, UploadManager};
//! use lorekeep_core::{EventBus, JobOptions, UploadSource};
//!
//! let manager = UploadManager::new(
//!     db.repositories(),
//!     Arc::new(OllamaBackend::from_env()),
//!     Arc::new(ExtractionRegistry::with_defaults()),
//!     IngestConfig::from_env(),
//!     EventBus::default(),
//! );
//!
//! let job = manager
//!     .submit(collection_id, UploadSource::Folder { path: "/srv/docs".into() }, JobOptions::default())
//!     .await?;
//!
//! let mut events = manager.events().subscribe();
//! while let Ok(event) = events.recv().await {
//!     if event.job_id == job.job_id && event.payload.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod adapters;
pub mod batch;
pub mod config;
pub mod extraction;
pub mod manager;
pub mod processor;
pub mod scan;

pub use batch::{BatchProcessor, BatchRequest, BatchResult, JobRef, ProgressCallback};
pub use config::IngestConfig;
pub use extraction::{supported_formats, ExtractionRegistry, SupportedFormats};
pub use manager::{UploadManager, DEFAULT_JOB_LIST_LIMIT};
pub use processor::{FileContext, FileOutcome, FileProcessor};
pub use scan::{resolve_source, scan_folder, unpack_zip, FileSet, IngestFile, ScanLimits};

pub use adapters::{
    AudioMetadataAdapter, DelimitedTextAdapter, DocxXmlAdapter, HtmlTextAdapter,
    JsonFlattenAdapter, LooseXmlTextAdapter, MarkdownTextAdapter, PdfExtractAdapter,
    PdftotextAdapter, PlainTextAdapter, PrintableRunsAdapter, RtfTextAdapter,
};
