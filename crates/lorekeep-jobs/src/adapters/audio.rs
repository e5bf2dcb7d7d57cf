//! Audio files: descriptive placeholder text.
//!
//! Transcription is not performed; the document records what the file is
//! so it can be found by name and format until a transcript is attached.

use async_trait::async_trait;

use lorekeep_core::file_safety::extension_of;
use lorekeep_core::{ExtractionAdapter, ExtractionResult, Result};

/// Adapter producing a metadata summary for audio uploads.
pub struct AudioMetadataAdapter;

#[async_trait]
impl ExtractionAdapter for AudioMetadataAdapter {
    async fn extract(
        &self,
        data: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<ExtractionResult> {
        let format = extension_of(filename)
            .map(|e| e.to_ascii_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let text = format!(
            "Audio file: {}\nFormat: {}\nSize: {} bytes\nContent type: {}",
            filename,
            format,
            data.len(),
            mime_type
        );

        Ok(ExtractionResult {
            metadata: serde_json::json!({
                "transcribed": false,
                "format": format,
                "size_bytes": data.len(),
            }),
            text,
            method: self.name().to_string(),
        })
    }

    fn name(&self) -> &str {
        "audio_metadata"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_audio_placeholder() {
        let result = AudioMetadataAdapter
            .extract(&[0u8; 16], "interview.mp3", "audio/mpeg")
            .await
            .unwrap();
        assert_eq!(
            result.text,
            "Audio file: interview.mp3\nFormat: MP3\nSize: 16 bytes\nContent type: audio/mpeg"
        );
        assert_eq!(result.metadata["transcribed"], false);
    }
}
