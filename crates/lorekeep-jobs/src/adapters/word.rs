//! Word processor formats: DOCX, RTF and legacy binary `.doc`.
//!
//! The chain for the Word format runs strictest first: the DOCX body part,
//! then any XML part inside the archive, then the RTF reader, and finally
//! printable byte runs as a last resort for binary documents.

use std::io::{Cursor, Read};

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use lorekeep_core::{Error, ExtractionAdapter, ExtractionResult, Result};

use super::text::cp1252_char;

/// Maximum decompressed bytes read from a single archive entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";

fn open_archive(data: &[u8]) -> Result<zip::ZipArchive<Cursor<&[u8]>>> {
    zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::Extraction(format!("Not an OOXML archive: {}", e)))
}

fn read_entry_bounded(archive: &mut zip::ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::Extraction(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::Extraction(format!(
            "Archive entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Collect character data from an XML part.
///
/// With `runs_only`, only text inside `<t>` elements (WordprocessingML runs)
/// is kept. Paragraph ends become newlines in both modes.
fn xml_text(xml: &[u8], runs_only: bool) -> Result<String> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_run = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" | b"h" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" | b"line-break" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_run || !runs_only => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Extraction(format!("XML text: {}", e)))?;
                if !runs_only && !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push(' ');
                }
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Extraction(format!(
                    "XML parse error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Trim each line and drop blank ones.
fn tidy_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text of the `word/document.xml` body part of a DOCX file.
pub struct DocxXmlAdapter;

#[async_trait]
impl ExtractionAdapter for DocxXmlAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let mut archive = open_archive(data)?;
        let body = read_entry_bounded(&mut archive, DOCX_BODY)?;
        let text = tidy_lines(&xml_text(&body, true)?);

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "part": DOCX_BODY,
                "paragraphs": text.lines().count(),
            }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "docx_xml"
    }
}

/// Character data from every XML part of an archive.
///
/// Covers damaged DOCX files and other zipped XML documents that lack the
/// standard body part.
pub struct LooseXmlTextAdapter;

#[async_trait]
impl ExtractionAdapter for LooseXmlTextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let mut archive = open_archive(data)?;
        let mut names: Vec<String> = archive
            .file_names()
            .filter(|n| n.ends_with(".xml") && !n.starts_with('[') && !n.contains("_rels/"))
            .map(str::to_string)
            .collect();
        names.sort();

        let mut parts = Vec::new();
        let mut used = Vec::new();
        for name in &names {
            let xml = read_entry_bounded(&mut archive, name)?;
            // One malformed part should not hide the others
            match xml_text(&xml, false) {
                Ok(text) => {
                    let text = tidy_lines(&text);
                    if !text.is_empty() {
                        parts.push(text);
                        used.push(name.clone());
                    }
                }
                Err(e) => tracing::debug!(part = %name, error = %e, "Skipping unreadable XML part"),
            }
        }

        Ok(ExtractionResult {
            metadata: serde_json::json!({ "parts": used }),
            text: parts.join("\n\n"),
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "loose_xml"
    }
}

/// Destinations whose content is never document text.
fn is_skipped_destination(word: &str) -> bool {
    matches!(
        word,
        "fonttbl"
            | "colortbl"
            | "stylesheet"
            | "info"
            | "pict"
            | "object"
            | "header"
            | "footer"
            | "headerl"
            | "headerr"
            | "footerl"
            | "footerr"
            | "listtable"
            | "listoverridetable"
            | "rsidtbl"
            | "generator"
            | "xmlnstbl"
            | "themedata"
            | "datastore"
            | "latentstyles"
    )
}

/// Plain text of an RTF document.
pub fn rtf_to_text(data: &[u8]) -> Result<String> {
    if !data.starts_with(b"{\\rtf") {
        return Err(Error::Extraction("Missing {\\rtf header".to_string()));
    }

    let mut out = String::new();
    let mut stack: Vec<bool> = Vec::new();
    let mut skip = false;
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        i += 1;
        match b {
            b'{' => stack.push(skip),
            b'}' => skip = stack.pop().unwrap_or(false),
            b'\r' | b'\n' => {}
            b'\\' => {
                let Some(&next) = data.get(i) else { break };
                if next.is_ascii_alphabetic() {
                    let start = i;
                    while i < data.len() && data[i].is_ascii_alphabetic() {
                        i += 1;
                    }
                    let word = std::str::from_utf8(&data[start..i]).unwrap_or_default();

                    let param_start = i;
                    if i < data.len() && data[i] == b'-' {
                        i += 1;
                    }
                    while i < data.len() && data[i].is_ascii_digit() {
                        i += 1;
                    }
                    let param: Option<i32> = std::str::from_utf8(&data[param_start..i])
                        .ok()
                        .and_then(|p| p.parse().ok());
                    if i < data.len() && data[i] == b' ' {
                        i += 1;
                    }

                    match word {
                        "par" | "line" | "sect" | "page" if !skip => out.push('\n'),
                        "tab" if !skip => out.push('\t'),
                        "u" => {
                            if let Some(n) = param {
                                let code = (if n < 0 { n + 65536 } else { n }) as u32;
                                if !skip {
                                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                                }
                                // ANSI fallback character follows a \u escape
                                if i < data.len() && !matches!(data[i], b'\\' | b'{' | b'}') {
                                    i += 1;
                                }
                            }
                        }
                        w if is_skipped_destination(w) => skip = true,
                        _ => {}
                    }
                } else {
                    i += 1;
                    match next {
                        b'\\' | b'{' | b'}' if !skip => out.push(char::from(next)),
                        b'~' if !skip => out.push(' '),
                        b'_' if !skip => out.push('-'),
                        b'*' => skip = true,
                        b'\'' => {
                            let hex = data.get(i..i + 2).and_then(|h| std::str::from_utf8(h).ok());
                            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                                i += 2;
                                if !skip {
                                    out.push(cp1252_char(byte));
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ if !skip => out.push(cp1252_char(b)),
            _ => {}
        }
    }

    Ok(tidy_lines(&out))
}

/// Adapter for RTF documents.
pub struct RtfTextAdapter;

#[async_trait]
impl ExtractionAdapter for RtfTextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let text = rtf_to_text(data)?;
        Ok(ExtractionResult {
            metadata: serde_json::json!({ "char_count": text.chars().count() }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "rtf_text"
    }
}

/// Default minimum run length for [`PrintableRunsAdapter`].
pub const MIN_PRINTABLE_RUN: usize = 8;

fn is_printable(b: u8) -> bool {
    b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn collect_runs(chars: impl Iterator<Item = Option<char>>, min_run: usize) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    for c in chars {
        match c {
            Some(c) => current.push(c),
            None => {
                if current.trim().len() >= min_run {
                    runs.push(current.trim().to_string());
                }
                current.clear();
            }
        }
    }
    if current.trim().len() >= min_run {
        runs.push(current.trim().to_string());
    }
    runs
}

/// Printable ASCII runs, and UTF-16LE runs as stored by binary Word files.
///
/// Whichever reading yields more text wins. Used when no structured reader
/// understood the file.
pub struct PrintableRunsAdapter {
    min_run: usize,
}

impl Default for PrintableRunsAdapter {
    fn default() -> Self {
        Self {
            min_run: MIN_PRINTABLE_RUN,
        }
    }
}

impl PrintableRunsAdapter {
    pub fn with_min_run(min_run: usize) -> Self {
        Self {
            min_run: min_run.max(1),
        }
    }

    fn runs(&self, data: &[u8]) -> (Vec<String>, &'static str) {
        let ascii = collect_runs(
            data.iter()
                .map(|&b| is_printable(b).then(|| char::from(b))),
            self.min_run,
        );
        let wide = collect_runs(
            data.chunks_exact(2).map(|pair| {
                (pair[1] == 0 && is_printable(pair[0])).then(|| char::from(pair[0]))
            }),
            self.min_run,
        );

        let len = |runs: &[String]| runs.iter().map(String::len).sum::<usize>();
        if len(&wide) > len(&ascii) {
            (wide, "utf-16le")
        } else {
            (ascii, "ascii")
        }
    }
}

#[async_trait]
impl ExtractionAdapter for PrintableRunsAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let (runs, encoding) = self.runs(data);
        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "runs": runs.len(),
                "encoding": encoding,
            }),
            text: runs.join("\n"),
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "printable_runs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report &amp; summary</w:t></w:r></w:p>
    <w:p><w:r><w:t>Revenue</w:t><w:tab/><w:t>up</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[tokio::test]
    async fn test_docx_paragraphs_and_runs() {
        let data = zip_with(&[("word/document.xml", DOCUMENT_XML)]);
        let result = DocxXmlAdapter
            .extract(&data, "report.docx", "application/msword")
            .await
            .unwrap();
        assert_eq!(result.text, "Quarterly report & summary\nRevenue\tup");
        assert_eq!(result.metadata["paragraphs"], 2);
    }

    #[tokio::test]
    async fn test_docx_without_body_part_fails() {
        let data = zip_with(&[("content.xml", "<doc><p>Loose text</p></doc>")]);
        assert!(DocxXmlAdapter.extract(&data, "odd.docx", "").await.is_err());

        let result = LooseXmlTextAdapter
            .extract(&data, "odd.docx", "")
            .await
            .unwrap();
        assert_eq!(result.text, "Loose text");
        assert_eq!(result.metadata["parts"][0], "content.xml");
    }

    #[tokio::test]
    async fn test_non_zip_is_rejected() {
        let err = DocxXmlAdapter
            .extract(b"plain bytes", "a.doc", "application/msword")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn test_rtf_control_words_and_escapes() {
        let rtf = br"{\rtf1\ansi{\fonttbl\f0\fswiss Helvetica;}\f0\pard Hello \b world\b0 .\par Caf\'e9 na\u239?ve\par}";
        assert_eq!(rtf_to_text(rtf).unwrap(), "Hello world.\nCaf\u{e9} na\u{ef}ve");
    }

    #[test]
    fn test_rtf_ignorable_destinations() {
        let rtf = br"{\rtf1{\*\generator Writer 1.0;}Body \{braced\}\par}";
        assert_eq!(rtf_to_text(rtf).unwrap(), "Body {braced}");
    }

    #[test]
    fn test_rtf_requires_header() {
        assert!(rtf_to_text(b"Hello").is_err());
    }

    #[tokio::test]
    async fn test_printable_ascii_runs() {
        let data = b"\x00\x01Quarterly report summary\x00\xff\x02ab\x00More text here!";
        let result = PrintableRunsAdapter::with_min_run(8)
            .extract(data, "legacy.doc", "application/msword")
            .await
            .unwrap();
        assert_eq!(result.text, "Quarterly report summary\nMore text here!");
        assert_eq!(result.metadata["encoding"], "ascii");
    }

    #[tokio::test]
    async fn test_printable_utf16_runs() {
        let data = b"T\0h\0e\0 \0q\0u\0i\0c\0k\0 \0f\0o\0x\0";
        let result = PrintableRunsAdapter::default()
            .extract(data, "legacy.doc", "application/msword")
            .await
            .unwrap();
        assert_eq!(result.text, "The quick fox");
        assert_eq!(result.metadata["encoding"], "utf-16le");
    }
}
