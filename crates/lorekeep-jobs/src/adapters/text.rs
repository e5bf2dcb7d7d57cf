//! Plain text extraction with encoding detection.

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

use lorekeep_core::{ExtractionAdapter, ExtractionResult, Result};

/// Map one Windows-1252 byte to its character.
pub(crate) fn cp1252_char(b: u8) -> char {
    let bytes = [b];
    let (decoded, _) = WINDOWS_1252.decode_without_bom_handling(&bytes);
    decoded.chars().next().unwrap_or(char::REPLACEMENT_CHARACTER)
}

/// Decode bytes to text, returning the text and the detected encoding.
///
/// Order: byte-order marks, strict UTF-8, then Windows-1252 (maps every
/// byte, so it never fails).
pub fn decode_text(data: &[u8]) -> (String, &'static str) {
    if let Some((encoding, bom_len)) = Encoding::for_bom(data) {
        let (text, _) = encoding.decode_without_bom_handling(&data[bom_len..]);
        let label = if encoding == UTF_16LE {
            "utf-16le"
        } else if encoding == UTF_16BE {
            "utf-16be"
        } else {
            "utf-8-sig"
        };
        return (text.into_owned(), label);
    }
    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(data) {
        return (text.into_owned(), "utf-8");
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(data);
    (text.into_owned(), "windows-1252")
}

/// Adapter for plain text files.
pub struct PlainTextAdapter;

#[async_trait]
impl ExtractionAdapter for PlainTextAdapter {
    async fn extract(
        &self,
        data: &[u8],
        _filename: &str,
        _mime_type: &str,
    ) -> Result<ExtractionResult> {
        let (text, encoding) = decode_text(data);
        let line_count = text.lines().count();

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "encoding": encoding,
                "char_count": text.chars().count(),
                "line_count": line_count,
            }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let result = PlainTextAdapter
            .extract(b"Hello, world!\nLine two.", "test.txt", "text/plain")
            .await
            .unwrap();

        assert_eq!(result.text, "Hello, world!\nLine two.");
        assert_eq!(result.metadata["encoding"], "utf-8");
        assert_eq!(result.metadata["char_count"], 23);
        assert_eq!(result.metadata["line_count"], 2);
        assert_eq!(result.method, "plain_text");
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let (text, encoding) = decode_text(b"\xEF\xBB\xBFcaf\xC3\xA9");
        assert_eq!(text, "café");
        assert_eq!(encoding, "utf-8-sig");
    }

    #[test]
    fn test_utf16le_with_bom() {
        let (text, encoding) = decode_text(&[0xFF, 0xFE, b'h', 0, b'i', 0]);
        assert_eq!(text, "hi");
        assert_eq!(encoding, "utf-16le");
    }

    #[test]
    fn test_utf16be_with_bom() {
        let (text, encoding) = decode_text(&[0xFE, 0xFF, 0, b'o', 0, b'k']);
        assert_eq!(text, "ok");
        assert_eq!(encoding, "utf-16be");
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_cp1252() {
        // "naïve “quote”" in Windows-1252
        let (text, encoding) = decode_text(b"na\xEFve \x93quote\x94");
        assert_eq!(text, "naïve \u{201C}quote\u{201D}");
        assert_eq!(encoding, "windows-1252");
    }

    #[test]
    fn test_utf16_odd_trailing_byte_is_replaced() {
        let (text, encoding) = decode_text(&[0xFF, 0xFE, b'o', 0, b'k', 0, b'!']);
        assert_eq!(encoding, "utf-16le");
        assert_eq!(text, "ok\u{FFFD}");
    }

    #[test]
    fn test_cp1252_char_maps_smart_punctuation() {
        assert_eq!(cp1252_char(0x80), '€');
        assert_eq!(cp1252_char(0x96), '\u{2013}');
        assert_eq!(cp1252_char(b'A'), 'A');
    }

    #[test]
    fn test_undefined_cp1252_bytes_pass_through() {
        let (text, _) = decode_text(&[b'a', 0x81, 0xFF]);
        assert_eq!(text.chars().count(), 3);
        assert!(text.ends_with('ÿ'));
    }
}
