//! Markdown extraction: renders the event stream to plain text.

use async_trait::async_trait;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

use lorekeep_core::{ExtractionAdapter, ExtractionResult, Result};

use super::text::decode_text;

/// Strip markup from markdown, keeping text, code and block boundaries.
///
/// Front matter and raw HTML are dropped. Returns the text and the first
/// heading, if any.
pub fn markdown_to_text(source: &str) -> (String, Option<String>) {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_YAML_STYLE_METADATA_BLOCKS;

    let mut out = String::with_capacity(source.len());
    let mut title: Option<String> = None;
    let mut heading: Option<String> = None;
    let mut in_metadata = false;

    for event in Parser::new_ext(source, options) {
        match event {
            Event::Start(Tag::MetadataBlock(_)) => in_metadata = true,
            Event::End(TagEnd::MetadataBlock(_)) => in_metadata = false,
            Event::Start(Tag::Heading { .. }) => heading = Some(String::new()),
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = heading.take() {
                    if title.is_none() && !h.trim().is_empty() {
                        title = Some(h.trim().to_string());
                    }
                }
                out.push_str("\n\n");
            }
            Event::Text(text) | Event::Code(text) if !in_metadata => {
                if let Some(h) = heading.as_mut() {
                    h.push_str(&text);
                }
                out.push_str(&text);
            }
            Event::SoftBreak | Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock | TagEnd::TableRow) => {
                out.push_str("\n\n")
            }
            Event::End(TagEnd::TableCell) => out.push(' '),
            _ => {}
        }
    }

    (out.trim().to_string(), title)
}

/// Adapter for markdown files.
pub struct MarkdownTextAdapter;

#[async_trait]
impl ExtractionAdapter for MarkdownTextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let (source, encoding) = decode_text(data);
        let (text, title) = markdown_to_text(&source);

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "encoding": encoding,
                "title": title,
                "source_chars": source.chars().count(),
            }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "markdown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markup_is_stripped() {
        let (text, title) = markdown_to_text(
            "# Setup Guide\n\nInstall **the** `cli` first.\n\n- one\n- two\n\n<div>raw</div>\n",
        );
        assert_eq!(title.as_deref(), Some("Setup Guide"));
        assert!(text.starts_with("Setup Guide"));
        assert!(text.contains("Install the cli first."));
        assert!(text.contains("one"));
        assert!(text.contains("two"));
        assert!(!text.contains("**"));
        assert!(!text.contains("<div>"));
    }

    #[test]
    fn test_front_matter_is_skipped() {
        let (text, _) = markdown_to_text("---\ntitle: Hidden\n---\n\nVisible body.\n");
        assert!(!text.contains("Hidden"));
        assert_eq!(text, "Visible body.");
    }

    #[test]
    fn test_code_blocks_are_kept() {
        let (text, _) = markdown_to_text("Run this:\n\n```sh\ncargo build\n```\n");
        assert!(text.contains("cargo build"));
    }

    #[tokio::test]
    async fn test_adapter_reports_title() {
        let result = MarkdownTextAdapter
            .extract(b"# Notes\n\nBody text.", "notes.md", "text/markdown")
            .await
            .unwrap();
        assert_eq!(result.metadata["title"], "Notes");
        assert_eq!(result.method, "markdown");
    }
}
