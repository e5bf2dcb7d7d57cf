//! MIME detection and upload path hygiene.
//!
//! Detection order:
//! 1. Extension override table, for types content sniffing misclassifies
//!    (markdown and csv sniff as plain text, docx sniffs as a zip archive,
//!    a damaged pdf sniffs as whatever its bytes resemble)
//! 2. Magic byte detection via `infer`
//! 3. Extension map for text formats without magic bytes
//! 4. `text/plain` when the bytes are valid UTF-8, else `application/octet-stream`

use std::path::{Component, Path};

/// Extensions accepted for ingestion (lowercase, with leading dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".txt", ".md", ".markdown", ".html", ".htm", ".pdf", ".docx", ".doc", ".rtf", ".csv",
    ".json", ".wav", ".mp3", ".m4a", ".flac", ".ogg", ".aac",
];

/// Types whose extension beats content sniffing.
fn mime_override(ext: &str) -> Option<&'static str> {
    match ext {
        "md" | "markdown" => Some("text/markdown"),
        "csv" => Some("text/csv"),
        "json" => Some("application/json"),
        "txt" => Some("text/plain"),
        "html" | "htm" => Some("text/html"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "doc" => Some("application/msword"),
        "rtf" => Some("application/rtf"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Text formats that carry no magic bytes.
fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "log" | "ini" | "cfg" | "conf" => Some("text/plain"),
        "tsv" => Some("text/tab-separated-values"),
        "xml" => Some("application/xml"),
        "yaml" | "yml" => Some("application/yaml"),
        "rst" => Some("text/x-rst"),
        _ => None,
    }
}

/// Lowercase extension of `filename` without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `filename` has an extension accepted for ingestion.
pub fn is_supported(filename: &str) -> bool {
    match extension_of(filename) {
        Some(ext) => SUPPORTED_EXTENSIONS
            .iter()
            .any(|s| s.trim_start_matches('.') == ext),
        None => false,
    }
}

/// Detect the MIME type of a file from its name and leading bytes.
pub fn detect_mime_type(filename: &str, data: &[u8]) -> String {
    let ext = extension_of(filename);

    if let Some(mime) = ext.as_deref().and_then(mime_override) {
        return mime.to_string();
    }

    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }

    if let Some(mime) = ext.as_deref().and_then(mime_from_extension) {
        return mime.to_string();
    }

    if std::str::from_utf8(data).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

/// Sanitize a client-supplied filename for staging.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let sanitized = sanitized.trim();
    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return "unnamed_file".to_string();
    }
    sanitized.to_string()
}

/// Normalize a client-supplied relative path (`docs/api/auth.md`).
///
/// Every segment is sanitized; absolute paths, drive prefixes and parent
/// references are rejected. Returns `None` when nothing usable remains.
pub fn sanitize_relative_path(path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let mut segments = Vec::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(seg) => {
                let seg = seg.to_str()?;
                segments.push(sanitize_filename(seg));
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}
