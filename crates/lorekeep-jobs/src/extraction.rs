//! Extraction adapter registry for dispatching file processing.
//!
//! Each [`DocumentFormat`] maps to an ordered fallback chain of adapters.
//! Extraction walks the chain until one adapter returns non-empty text; a
//! failing adapter is logged and the next one is tried.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use lorekeep_core::{
    DocumentFormat, Error, ExtractionAdapter, ExtractionResult, Result, SUPPORTED_EXTENSIONS,
};

use crate::adapters::{
    AudioMetadataAdapter, DelimitedTextAdapter, DocxXmlAdapter, HtmlTextAdapter,
    JsonFlattenAdapter, LooseXmlTextAdapter, MarkdownTextAdapter, PdfExtractAdapter,
    PdftotextAdapter, PlainTextAdapter, PrintableRunsAdapter, RtfTextAdapter,
};

/// Registry mapping document formats to their adapter fallback chains.
pub struct ExtractionRegistry {
    chains: HashMap<DocumentFormat, Vec<Arc<dyn ExtractionAdapter>>>,
}

impl ExtractionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    /// Registry with the built-in chain for every supported format.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DocumentFormat::PlainText, Arc::new(PlainTextAdapter));
        registry.register(DocumentFormat::Markdown, Arc::new(MarkdownTextAdapter));
        registry.register(DocumentFormat::Markdown, Arc::new(PlainTextAdapter));
        registry.register(DocumentFormat::Html, Arc::new(HtmlTextAdapter));
        registry.register(DocumentFormat::Pdf, Arc::new(PdfExtractAdapter));
        registry.register(DocumentFormat::Pdf, Arc::new(PdftotextAdapter::default()));
        registry.register(DocumentFormat::Word, Arc::new(DocxXmlAdapter));
        registry.register(DocumentFormat::Word, Arc::new(LooseXmlTextAdapter));
        registry.register(DocumentFormat::Word, Arc::new(RtfTextAdapter));
        registry.register(DocumentFormat::Word, Arc::new(PrintableRunsAdapter::default()));
        registry.register(DocumentFormat::Structured, Arc::new(JsonFlattenAdapter));
        registry.register(DocumentFormat::Structured, Arc::new(DelimitedTextAdapter));
        registry.register(DocumentFormat::Structured, Arc::new(PlainTextAdapter));
        registry.register(DocumentFormat::Audio, Arc::new(AudioMetadataAdapter));
        registry
    }

    /// Append an adapter to the end of a format's chain.
    pub fn register(&mut self, format: DocumentFormat, adapter: Arc<dyn ExtractionAdapter>) {
        self.chains.entry(format).or_default().push(adapter);
    }

    /// Adapter names of a format's chain, in the order they are tried.
    pub fn chain(&self, format: DocumentFormat) -> Vec<&str> {
        self.chains
            .get(&format)
            .map(|c| c.iter().map(|a| a.name()).collect())
            .unwrap_or_default()
    }

    /// Check if any adapter is registered for the given format.
    pub fn has_adapter(&self, format: DocumentFormat) -> bool {
        self.chains.get(&format).is_some_and(|c| !c.is_empty())
    }

    /// Extract text, trying each adapter of the format's chain in turn.
    pub async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ExtractionResult> {
        let format = DocumentFormat::from_mime_type(mime_type)
            .ok_or_else(|| Error::UnsupportedFormat(mime_type.to_string()))?;
        let chain = self
            .chains
            .get(&format)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::UnsupportedFormat(format.to_string()))?;

        let mut failures = Vec::new();
        for adapter in chain {
            match adapter.extract(data, filename, mime_type).await {
                Ok(result) if !result.text.trim().is_empty() => {
                    debug!(
                        subsystem = "jobs",
                        component = "extraction",
                        file = filename,
                        format = %format,
                        adapter = adapter.name(),
                        chars = result.text.len(),
                        "Extraction succeeded"
                    );
                    return Ok(result);
                }
                Ok(_) => {
                    debug!(file = filename, adapter = adapter.name(), "Adapter produced no text");
                    failures.push(format!("{}: no text", adapter.name()));
                }
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "extraction",
                        file = filename,
                        adapter = adapter.name(),
                        error = %e,
                        "Extraction method failed, trying next"
                    );
                    failures.push(format!("{}: {}", adapter.name(), e));
                }
            }
        }

        Err(Error::Extraction(format!(
            "No text extracted from {} ({})",
            filename,
            failures.join("; ")
        )))
    }

    /// Run health checks on all registered adapters.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for adapter in self.chains.values().flatten() {
            let healthy = adapter.health_check().await.unwrap_or(false);
            results.insert(adapter.name().to_string(), healthy);
        }
        results
    }
}

impl Default for ExtractionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Accepted upload formats, as reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SupportedFormats {
    pub extensions: Vec<&'static str>,
    pub formats: Vec<DocumentFormat>,
    pub max_file_size_mb: u64,
    pub max_batch_files: usize,
}

/// Formats and limits accepted for ingestion.
pub fn supported_formats(max_file_size_mb: u64) -> SupportedFormats {
    SupportedFormats {
        extensions: SUPPORTED_EXTENSIONS.to_vec(),
        formats: DocumentFormat::all().to_vec(),
        max_file_size_mb,
        max_batch_files: lorekeep_core::defaults::MAX_BATCH_FILES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingAdapter;

    #[async_trait]
    impl ExtractionAdapter for FailingAdapter {
        async fn extract(&self, _: &[u8], _: &str, _: &str) -> Result<ExtractionResult> {
            Err(Error::Extraction("corrupt".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ExtractionRegistry::new();
        assert!(!registry.has_adapter(DocumentFormat::PlainText));
        assert!(registry.chain(DocumentFormat::Pdf).is_empty());
    }

    #[test]
    fn test_defaults_cover_every_format() {
        let registry = ExtractionRegistry::with_defaults();
        for format in DocumentFormat::all() {
            assert!(registry.has_adapter(format), "{} has no adapter", format);
        }
        assert_eq!(
            registry.chain(DocumentFormat::Word),
            vec!["docx_xml", "loose_xml", "rtf_text", "printable_runs"]
        );
        assert_eq!(registry.chain(DocumentFormat::Pdf), vec!["pdf_extract", "pdftotext"]);
    }

    #[tokio::test]
    async fn test_fallback_moves_to_next_adapter() {
        let mut registry = ExtractionRegistry::new();
        registry.register(DocumentFormat::PlainText, Arc::new(FailingAdapter));
        registry.register(DocumentFormat::PlainText, Arc::new(PlainTextAdapter));

        let result = registry
            .extract(b"hello world", "a.txt", "text/plain")
            .await
            .unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(result.method, "plain_text");
    }

    #[tokio::test]
    async fn test_all_adapters_failing_reports_each() {
        let mut registry = ExtractionRegistry::new();
        registry.register(DocumentFormat::PlainText, Arc::new(FailingAdapter));
        registry.register(DocumentFormat::PlainText, Arc::new(PlainTextAdapter));

        let err = registry
            .extract(b"   ", "blank.txt", "text/plain")
            .await
            .unwrap_err();
        match err {
            Error::Extraction(msg) => {
                assert!(msg.contains("failing: Extraction error: corrupt"));
                assert!(msg.contains("plain_text: no text"));
            }
            other => panic!("Expected Extraction error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_mime_is_unsupported() {
        let registry = ExtractionRegistry::with_defaults();
        let err = registry
            .extract(b"\x89PNG", "logo.png", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_health_check_all() {
        let registry = ExtractionRegistry::with_defaults();
        let results = registry.health_check_all().await;
        assert_eq!(results.get("plain_text"), Some(&true));
    }

    #[test]
    fn test_supported_formats_lists_extensions() {
        let formats = supported_formats(500);
        assert!(formats.extensions.contains(&".md"));
        assert!(formats.extensions.contains(&".flac"));
        assert_eq!(formats.formats.len(), 7);
        assert_eq!(formats.max_batch_files, 100);
    }
}
