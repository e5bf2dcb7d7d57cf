//! Core data models for lorekeep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use pgvector::Vector;

// =============================================================================
// COLLECTION TYPES
// =============================================================================

/// A named namespace for ingested documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Embedding model used for every vector in this collection.
    pub embedding_model: String,
    /// Completed documents (denormalized, see `rebuild_statistics`).
    #[serde(default)]
    pub total_documents: i64,
    /// Stored chunks across completed documents (denormalized).
    #[serde(default)]
    pub total_chunks: i64,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Request to create a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(format!("Unknown document status: {}", s)),
        }
    }
}

/// Where a document sits in the uploaded folder structure.
///
/// Derived from the file's relative path by
/// [`FolderPlacement::from_relative_path`](crate::paths::FolderPlacement::from_relative_path).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderPlacement {
    /// Path of the file within the upload, e.g. `docs/api/auth.md`.
    pub relative_path: String,
    /// Immediate parent folder name (`api`), `None` at the upload root.
    pub parent_folder: Option<String>,
    /// Number of folder segments above the file.
    pub folder_depth: i32,
    /// Full folder path (`docs/api`), empty at the upload root.
    pub folder_path: String,
    /// Structured folder metadata (hierarchy, folder type, root folder).
    pub folder_metadata: JsonValue,
    /// Location and type derived tags (`folder:docs`, `type:md`, `top-level`).
    pub document_tags: Vec<String>,
    /// Inferred content category (`documentation`, `code`, `office`, ...).
    pub content_category: String,
}

/// One ingested file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub upload_job_id: Option<Uuid>,
    /// Display filename.
    pub filename: String,
    pub original_filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    /// Hex SHA-256 of the file bytes, unique per collection.
    pub content_hash: String,
    /// Staging path recorded for traceability only.
    pub file_path: Option<String>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub chunk_count: i32,
    #[serde(flatten)]
    pub placement: FolderPlacement,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Request to create a document row in `processing` status.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub collection_id: Uuid,
    pub upload_job_id: Option<Uuid>,
    pub filename: String,
    pub original_filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub content_hash: String,
    pub file_path: Option<String>,
    pub placement: FolderPlacement,
}

/// A chunk row as stored for a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Zero-based, contiguous, in extraction order.
    pub chunk_index: i32,
    pub text: String,
    pub char_count: i32,
    /// Character offsets into the cleaned source text.
    pub start_offset: i32,
    pub end_offset: i32,
    /// `blake3:<hex>` digest of `text`.
    pub content_hash: String,
    /// Id of the entry in the vector index; set only after a successful upsert.
    pub vector_id: Option<String>,
    pub created_at_utc: DateTime<Utc>,
}

/// A chunk ready to persist alongside its document.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub text: String,
    pub start_offset: i32,
    pub end_offset: i32,
    pub content_hash: String,
    pub vector_id: Option<String>,
}

/// Minimal document view used to recompute folder statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFootprint {
    pub folder_path: String,
    pub size_bytes: i64,
}

// =============================================================================
// FOLDER HIERARCHY TYPES
// =============================================================================

/// A node of the reconstructed folder tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderNode {
    pub id: Uuid,
    pub collection_id: Uuid,
    pub upload_job_id: Option<Uuid>,
    pub name: String,
    /// Unique within the collection; equals `parent.full_path + "/" + name`.
    pub full_path: String,
    pub parent_id: Option<Uuid>,
    /// Root nodes have depth 0.
    pub depth: i32,
    /// Documents whose folder path equals `full_path`.
    pub document_count: i64,
    /// Documents at or below this node.
    pub total_documents: i64,
    /// Bytes of documents at or below this node.
    pub total_size_bytes: i64,
    pub folder_metadata: JsonValue,
    pub auto_tags: Vec<String>,
    pub content_summary: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

/// Request to insert one folder node.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFolderNode {
    pub collection_id: Uuid,
    pub upload_job_id: Option<Uuid>,
    pub name: String,
    pub full_path: String,
    pub parent_id: Option<Uuid>,
    pub depth: i32,
}

/// Recomputed statistics for one folder node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderStatistics {
    pub folder_id: Uuid,
    pub document_count: i64,
    pub total_documents: i64,
    pub total_size_bytes: i64,
    pub auto_tags: Vec<String>,
}

/// Folder node with nested children, as returned by the tree query.
#[derive(Debug, Clone, Serialize)]
pub struct FolderTreeNode {
    #[serde(flatten)]
    pub node: FolderNode,
    pub children: Vec<FolderTreeNode>,
}

impl FolderTreeNode {
    /// Number of nodes in this subtree, including self.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(FolderTreeNode::count).sum::<usize>()
    }
}

/// Aggregate view over a collection's folder tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSummary {
    pub total_folders: i64,
    pub max_depth: i32,
    pub total_documents: i64,
    pub total_size_bytes: i64,
}

/// One breadcrumb entry for a folder path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
    pub depth: i32,
    pub is_current: bool,
}

// =============================================================================
// VECTOR INDEX TYPES
// =============================================================================

/// Entry written to the vector index for one chunk.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    pub vector: Vector,
    pub metadata: JsonValue,
}

/// A ranked vector search match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub vector_id: String,
    pub document_id: Uuid,
    pub chunk_index: i32,
    pub text: String,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub score: f32,
}

// =============================================================================
// EXTRACTION TYPES
// =============================================================================

/// Format family of an ingested file. Each family has its own extractor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    /// Plain text with encoding detection.
    PlainText,
    /// Markdown, stripped to prose.
    Markdown,
    /// HTML, tag-aware stripping.
    Html,
    /// PDF, page by page.
    Pdf,
    /// Word documents (docx, legacy doc, rtf).
    Word,
    /// Delimited or structured data (CSV, JSON).
    Structured,
    /// Audio; metadata-only placeholder text.
    Audio,
}

impl DocumentFormat {
    /// Map a MIME type to its format family. `None` means unsupported.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_ascii_lowercase();
        let format = match mime.as_str() {
            "text/plain" => DocumentFormat::PlainText,
            "text/markdown" | "text/x-markdown" => DocumentFormat::Markdown,
            "text/html" | "application/xhtml+xml" => DocumentFormat::Html,
            "application/pdf" => DocumentFormat::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/msword"
            | "application/rtf"
            | "text/rtf" => DocumentFormat::Word,
            "text/csv" | "application/json" | "application/csv" => DocumentFormat::Structured,
            m if m.starts_with("audio/") => DocumentFormat::Audio,
            _ => return None,
        };
        Some(format)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::PlainText => "plain_text",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Html => "html",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Word => "word",
            DocumentFormat::Structured => "structured",
            DocumentFormat::Audio => "audio",
        }
    }

    /// All formats, in a stable order.
    pub fn all() -> [DocumentFormat; 7] {
        [
            DocumentFormat::PlainText,
            DocumentFormat::Markdown,
            DocumentFormat::Html,
            DocumentFormat::Pdf,
            DocumentFormat::Word,
            DocumentFormat::Structured,
            DocumentFormat::Audio,
        ]
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentFormat::all()
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("Unknown document format: {}", s))
    }
}

/// Output of a single extraction adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    /// Adapter-specific metadata (page count, detected encoding, row count).
    pub metadata: JsonValue,
    /// Name of the adapter that produced `text`.
    pub method: String,
}
