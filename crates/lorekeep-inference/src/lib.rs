//! # lorekeep-inference
//!
//! Embedding backends for lorekeep.
//!
//! This crate provides:
//! - Ollama implementation of [`EmbeddingBackend`] (default)
//! - A deadline-and-retry wrapper shared by every backend
//! - A deterministic mock backend with failure injection (feature `mock`)
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `mock`: Expose [`mock::MockEmbeddingBackend`] to downstream tests
//!
//! # Example
//!
//! ```rust,no_run
//! use lorekeep_inference::{embed_with_retry, OllamaBackend, RetryPolicy};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::from_env();
//!     let texts = vec!["Hello".to_string()];
//!     let vectors = embed_with_retry(&backend, &texts, &RetryPolicy::default())
//!         .await
//!         .unwrap();
//! }
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

pub mod retry;

// Mock embedding backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use lorekeep_core::{EmbeddingBackend, Error, Result, Vector};
pub use retry::{embed_with_retry, RetryPolicy};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;
