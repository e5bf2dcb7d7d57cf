//! Mock embedding backend for deterministic testing.
//!
//! Generates deterministic embeddings from text content and can be told to
//! fail: the first `n` calls or a random fraction of calls (as a transient
//! outage), or any call whose input contains a marker string (as a
//! permanent rejection).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lorekeep_inference::mock::MockEmbeddingBackend;
//! use lorekeep_core::EmbeddingBackend;
//!
//! #[tokio::test]
//! async fn test_with_mock_backend() {
//!     let backend = MockEmbeddingBackend::new()
//!         .with_dimension(384)
//!         .fail_when_contains("POISON");
//!
//!     let vectors = backend.embed_texts(&["test text".to_string()]).await.unwrap();
//!     assert_eq!(vectors[0].as_slice().len(), 384);
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lorekeep_core::{EmbeddingBackend, Error, Result, Vector};

type ErrorFactory = Arc<dyn Fn() -> Error + Send + Sync>;

/// Mock embedding backend for testing.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    config: Arc<MockConfig>,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
struct MockConfig {
    dimension: usize,
    model: String,
    latency_ms: u64,
    fail_first: usize,
    fail_marker: Option<String>,
    failure_rate: f64,
    error: Option<ErrorFactory>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            model: "mock-embed".to_string(),
            latency_ms: 0,
            fail_first: 0,
            fail_marker: None,
            failure_rate: 0.0,
            error: None,
        }
    }
}

impl MockEmbeddingBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Fail the first `n` calls with a transient embedding error.
    pub fn fail_first(mut self, n: usize) -> Self {
        Arc::make_mut(&mut self.config).fail_first = n;
        self
    }

    /// Fail every call where any input contains `marker`.
    pub fn fail_when_contains(mut self, marker: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).fail_marker = Some(marker.into());
        self
    }

    /// Set failure rate (0.0 - 1.0) for testing error handling.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        Arc::make_mut(&mut self.config).failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fail every call with the error produced by `make`.
    pub fn with_error(mut self, make: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        Arc::make_mut(&mut self.config).error = Some(Arc::new(make));
        self
    }

    /// Number of `embed_texts` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text passed to the backend, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn should_fail_randomly(&self) -> bool {
        use rand::Rng;
        self.config.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.config.failure_rate
    }
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.inputs.lock() {
            log.extend(texts.iter().cloned());
        }

        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }

        if let Some(make) = &self.config.error {
            return Err(make());
        }
        if call < self.config.fail_first {
            return Err(Error::EmbeddingUnavailable(format!(
                "Simulated failure on call {}",
                call + 1
            )));
        }
        if let Some(marker) = &self.config.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(Error::Embedding(format!(
                    "Simulated failure for input containing {:?}",
                    marker
                )));
            }
        }
        if self.should_fail_randomly() {
            return Err(Error::EmbeddingUnavailable("Simulated random failure".into()));
        }

        Ok(texts
            .iter()
            .map(|t| Vector::from(MockEmbeddingGenerator::generate(t, self.config.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic embedding from text.
    ///
    /// Uses character-based hashing for reproducibility. The same text
    /// will always produce the same embedding.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        if dimension == 0 {
            return vec;
        }

        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }

        Self::normalize(&mut vec);
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_backend_embed() {
        let backend = MockEmbeddingBackend::new().with_dimension(128);
        let out = backend.embed_texts(&["test".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_slice().len(), 128);
    }

    #[tokio::test]
    async fn test_mock_backend_deterministic() {
        let backend = MockEmbeddingBackend::new();
        let texts = vec!["quantum computing".to_string()];
        let e1 = backend.embed_texts(&texts).await.unwrap();
        let e2 = backend.embed_texts(&texts).await.unwrap();
        assert_eq!(e1[0].as_slice(), e2[0].as_slice());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_marker_failure_only_hits_matching_input() {
        let backend = MockEmbeddingBackend::new().fail_when_contains("POISON");
        assert!(backend.embed_texts(&["fine".to_string()]).await.is_ok());
        let err = backend
            .embed_texts(&["has POISON in it".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(!err.is_transient());
        assert_eq!(backend.inputs(), vec!["fine", "has POISON in it"]);
    }

    #[test]
    fn test_generator_normalizes() {
        let v = MockEmbeddingGenerator::generate("normalize me", 64);
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }
}
