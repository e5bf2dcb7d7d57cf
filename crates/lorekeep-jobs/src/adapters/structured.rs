//! Structured data: JSON documents and delimited tables.
//!
//! Both adapters render records as `key: value` lines so that field names
//! travel with their values into chunks and embeddings.

use async_trait::async_trait;
use serde_json::Value;

use lorekeep_core::{Error, ExtractionAdapter, ExtractionResult, Result};

use super::text::decode_text;

fn flatten_json(value: &Value, path: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_json(child, &child_path, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_json(child, &format!("{}[{}]", path, i), out);
            }
        }
        Value::String(s) if path.is_empty() => out.push(s.clone()),
        Value::String(s) => out.push(format!("{}: {}", path, s)),
        other if path.is_empty() => out.push(other.to_string()),
        other => out.push(format!("{}: {}", path, other)),
    }
}

/// Flatten a JSON document to `path: value` lines.
pub fn json_to_text(source: &str) -> Result<(String, usize)> {
    let value: Value = serde_json::from_str(source)?;
    let mut lines = Vec::new();
    flatten_json(&value, "", &mut lines);
    let count = lines.len();
    Ok((lines.join("\n"), count))
}

/// Adapter for JSON files.
pub struct JsonFlattenAdapter;

#[async_trait]
impl ExtractionAdapter for JsonFlattenAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let (source, encoding) = decode_text(data);
        let (text, fields) = json_to_text(source.trim_start_matches('\u{feff}'))?;

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "encoding": encoding,
                "fields": fields,
            }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "json_flatten"
    }
}

/// Pick the delimiter that splits the header line most.
fn sniff_delimiter(text: &str) -> char {
    let header = text.lines().next().unwrap_or_default();
    [',', ';', '\t', '|']
        .into_iter()
        .max_by_key(|d| header.matches(*d).count())
        .unwrap_or(',')
}

/// Split delimited text into rows, honoring double-quoted fields.
pub fn parse_delimited(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            c => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    rows.retain(|r| r.iter().any(|f| !f.trim().is_empty()));
    rows
}

/// Adapter for CSV and similar delimited files.
///
/// The first row is taken as the header; each data row becomes one line of
/// `header: value` pairs.
pub struct DelimitedTextAdapter;

#[async_trait]
impl ExtractionAdapter for DelimitedTextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let (source, encoding) = decode_text(data);
        let delimiter = sniff_delimiter(&source);
        let mut rows = parse_delimited(&source, delimiter).into_iter();

        let headers: Vec<String> = rows
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.len() < 2 {
            return Err(Error::Extraction(format!(
                "{} has no delimited header row",
                filename
            )));
        }

        let lines: Vec<String> = rows
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| !v.trim().is_empty())
                    .map(|(i, v)| match headers.get(i).filter(|h| !h.is_empty()) {
                        Some(h) => format!("{}: {}", h, v.trim()),
                        None => format!("column_{}: {}", i + 1, v.trim()),
                    })
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect();

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "encoding": encoding,
                "delimiter": delimiter.to_string(),
                "columns": headers,
                "rows": lines.len(),
            }),
            text: lines.join("\n"),
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "delimited_text"
    }
}
