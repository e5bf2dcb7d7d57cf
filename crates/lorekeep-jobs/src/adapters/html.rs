//! HTML extraction via tag-aware stripping.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use lorekeep_core::{ExtractionAdapter, ExtractionResult, Result};

use super::text::decode_text;

static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title\s*>").unwrap());
static INVISIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<template\b.*?</template\s*>|<head\b.*?</head\s*>",
    )
    .unwrap()
});
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)</?(?:p|div|br|hr|h[1-6]|li|tr|td|th|section|article|header|footer|nav|aside|blockquote|pre|table|ul|ol|dl|dt|dd|main|figure|figcaption)\b[^>]*>",
    )
    .unwrap()
});
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());
static INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").unwrap());

/// Decode named and numeric character references.
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match body {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "mdash" => Some('\u{2014}'),
                    "ndash" => Some('\u{2013}'),
                    "hellip" => Some('\u{2026}'),
                    "copy" => Some('\u{00A9}'),
                    _ => None,
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Visible text of an HTML document, one block element per line.
pub fn html_to_text(html: &str) -> (String, Option<String>) {
    let title = TITLE
        .captures(html)
        .map(|c| decode_entities(ANY_TAG.replace_all(&c[1], "").trim()))
        .filter(|t| !t.is_empty());

    let visible = INVISIBLE.replace_all(html, " ");
    let blocks = BLOCK_TAG.replace_all(&visible, "\n");
    let stripped = ANY_TAG.replace_all(&blocks, "");
    let decoded = decode_entities(&stripped);

    let lines: Vec<String> = decoded
        .lines()
        .map(|l| INLINE_SPACE.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    (lines.join("\n"), title)
}

/// Adapter for HTML files.
pub struct HtmlTextAdapter;

#[async_trait]
impl ExtractionAdapter for HtmlTextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let (source, encoding) = decode_text(data);
        let (text, title) = html_to_text(&source);

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "encoding": encoding,
                "title": title,
            }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "html_text"
    }
}
