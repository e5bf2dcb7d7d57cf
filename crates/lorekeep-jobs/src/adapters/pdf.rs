//! PDF extraction: in-process parser first, `pdftotext` (poppler-utils) as fallback.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use lorekeep_core::{Error, ExtractionAdapter, ExtractionResult, Result};

/// Default timeout for one `pdftotext` invocation.
pub const PDFTOTEXT_TIMEOUT_SECS: u64 = 120;

fn check_pdf_header(data: &[u8], filename: &str) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::Extraction(format!(
            "File '{}' is not a valid PDF (missing %PDF header)",
            filename
        )));
    }
    Ok(())
}

/// Join per-page text with page markers, skipping blank pages.
fn label_pages<'a>(pages: impl Iterator<Item = &'a str>) -> (String, usize) {
    let mut total = 0;
    let labelled: Vec<String> = pages
        .enumerate()
        .inspect(|_| total += 1)
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| format!("--- Page {} ---\n{}", i + 1, text.trim()))
        .collect();
    (labelled.join("\n\n"), total)
}

/// In-process extraction with the `pdf-extract` crate.
///
/// Parsing runs on the blocking pool; a parser panic on a malformed file
/// surfaces as an extraction error instead of taking the task down.
pub struct PdfExtractAdapter;

#[async_trait]
impl ExtractionAdapter for PdfExtractAdapter {
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        check_pdf_header(data, filename)?;

        let bytes = data.to_vec();
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| Error::Extraction(format!("PDF parser aborted: {}", e)))?
            .map_err(|e| Error::Extraction(format!("PDF parse failed: {}", e)))?;

        let (text, pages) = label_pages(raw.split('\x0c'));
        Ok(ExtractionResult {
            metadata: serde_json::json!({ "pages": pages }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "pdf_extract"
    }
}

/// Extraction through the `pdftotext` command.
pub struct PdftotextAdapter {
    timeout: Duration,
}

impl Default for PdftotextAdapter {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(PDFTOTEXT_TIMEOUT_SECS),
        }
    }
}

impl PdftotextAdapter {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Run a command with a timeout, returning stdout as a string.
async fn run_cmd_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<String> {
    cmd.kill_on_drop(true);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "External command timed out after {}s",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::Extraction(format!("Failed to execute command: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Extraction(format!(
            "Command failed (exit {}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[async_trait]
impl ExtractionAdapter for PdftotextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        check_pdf_header(data, filename)?;

        // pdftotext reads from a file path
        let mut tmpfile = NamedTempFile::new()?;
        tmpfile.write_all(data)?;
        tmpfile.flush()?;

        let raw = run_cmd_with_timeout(
            Command::new("pdftotext")
                .arg("-layout")
                .arg(tmpfile.path())
                .arg("-"),
            self.timeout,
        )
        .await?;

        let (text, pages) = label_pages(raw.split('\x0c'));
        debug!(file = filename, pages, "pdftotext extraction complete");
        Ok(ExtractionResult {
            metadata: serde_json::json!({ "pages": pages }),
            text,
            method: self.name().to_string(),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let status = Command::new("pdftotext")
            .arg("-v")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        Ok(status.map(|s| s.success()).unwrap_or(false))
    }

    fn name(&self) -> &str {
        "pdftotext"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_pages_skips_blank_pages() {
        let (text, pages) = label_pages("First page.\x0c  \x0cThird page.".split('\x0c'));
        assert_eq!(pages, 3);
        assert_eq!(text, "--- Page 1 ---\nFirst page.\n\n--- Page 3 ---\nThird page.");
    }

    #[tokio::test]
    async fn test_rejects_non_pdf_bytes() {
        let err = PdfExtractAdapter
            .extract(b"not a pdf", "fake.pdf", "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(ref m) if m.contains("%PDF")));

        let err = PdftotextAdapter::default()
            .extract(b"", "empty.pdf", "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_truncated_pdf_is_an_error_not_a_panic() {
        let result = PdfExtractAdapter
            .extract(b"%PDF-1.7\n%garbage", "broken.pdf", "application/pdf")
            .await;
        assert!(result.is_err());
    }
}
