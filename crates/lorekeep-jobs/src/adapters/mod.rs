//! Extraction adapter implementations.

pub mod audio;
pub mod html;
pub mod markdown;
pub mod pdf;
pub mod structured;
pub mod text;
pub mod word;

pub use audio::AudioMetadataAdapter;
pub use html::HtmlTextAdapter;
pub use markdown::MarkdownTextAdapter;
pub use pdf::{PdfExtractAdapter, PdftotextAdapter};
pub use structured::{DelimitedTextAdapter, JsonFlattenAdapter};
pub use text::PlainTextAdapter;
pub use word::{DocxXmlAdapter, LooseXmlTextAdapter, PrintableRunsAdapter, RtfTextAdapter};
