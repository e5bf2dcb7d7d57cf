//! Core traits for lorekeep abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability. Each
//! repository method runs in its own transaction; callers never share
//! one across files.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::upload_job::*;

// =============================================================================
// COLLECTION REPOSITORY
// =============================================================================

/// Repository for collection CRUD and denormalized totals.
#[async_trait]
pub trait CollectionRepository: Send + Sync {
    /// Create a collection. A duplicate name is a `Conflict`.
    async fn create(&self, req: CreateCollectionRequest, default_model: &str)
        -> Result<Collection>;

    /// Get a collection by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Collection>>;

    /// Get a collection by its unique name.
    async fn get_by_name(&self, name: &str) -> Result<Option<Collection>>;

    /// List all collections, newest first.
    async fn list(&self) -> Result<Vec<Collection>>;

    /// Delete a collection and everything it owns. Returns false if absent.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Recompute `total_documents` and `total_chunks` from completed documents.
    async fn rebuild_statistics(&self, id: Uuid) -> Result<Collection>;
}

// =============================================================================
// DOCUMENT REPOSITORY
// =============================================================================

/// Repository for documents and their chunk rows.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Find the document holding `content_hash` in the collection, if any.
    async fn find_by_hash(&self, collection_id: Uuid, content_hash: &str)
        -> Result<Option<Document>>;

    /// Insert a document in `processing` status.
    async fn create_processing(&self, doc: NewDocument) -> Result<Document>;

    /// Store chunk rows, set `completed` and `chunk_count`, in one transaction.
    async fn complete(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<Document>;

    /// Mark a document `failed` with the captured error message.
    async fn mark_failed(&self, document_id: Uuid, error: &str) -> Result<()>;

    /// Delete a document's chunk rows and then the document row, in one transaction.
    async fn retire(&self, document_id: Uuid) -> Result<()>;

    /// Get a document by ID.
    async fn get(&self, document_id: Uuid) -> Result<Option<Document>>;

    /// List documents of a collection, optionally restricted to one folder path.
    async fn list(&self, collection_id: Uuid, folder_path: Option<&str>)
        -> Result<Vec<Document>>;

    /// Chunk rows of a document ordered by chunk index.
    async fn get_chunks(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>>;

    /// Folder path and size of every document in the collection.
    async fn footprints(&self, collection_id: Uuid) -> Result<Vec<DocumentFootprint>>;
}

// =============================================================================
// FOLDER REPOSITORY
// =============================================================================

/// Repository for reconstructed folder nodes.
#[async_trait]
pub trait FolderRepository: Send + Sync {
    /// Find a folder node by its full path.
    async fn find_by_path(&self, collection_id: Uuid, full_path: &str)
        -> Result<Option<FolderNode>>;

    /// Insert a node, or return the existing one with the same full path.
    ///
    /// Returns the node and whether it was newly created.
    async fn insert_node(&self, node: NewFolderNode) -> Result<(FolderNode, bool)>;

    /// All folder nodes of a collection, ordered by depth then name.
    async fn list(&self, collection_id: Uuid) -> Result<Vec<FolderNode>>;

    /// Write recomputed statistics for a set of nodes.
    async fn apply_statistics(&self, stats: Vec<FolderStatistics>) -> Result<()>;
}

// =============================================================================
// UPLOAD JOB REPOSITORY
// =============================================================================

/// Repository for upload jobs. Status updates are forward-only.
#[async_trait]
pub trait UploadJobRepository: Send + Sync {
    /// Insert a `pending` job.
    async fn create(&self, job: NewUploadJob) -> Result<UploadJob>;

    /// Get a job by its external id.
    async fn get(&self, job_id: &str) -> Result<Option<UploadJob>>;

    /// List jobs of a collection, newest first.
    async fn list(
        &self,
        collection_id: Uuid,
        status: Option<UploadJobStatus>,
        limit: i64,
    ) -> Result<Vec<UploadJob>>;

    /// Move `pending -> processing` and record `started_at`.
    async fn mark_processing(&self, job_id: &str) -> Result<UploadJob>;

    /// Record the resolved file count and folder-structure snapshot.
    async fn record_file_set(
        &self,
        job_id: &str,
        total_files: i32,
        structure: FolderStructure,
    ) -> Result<()>;

    /// Set the number of files a `processing` job will handle.
    async fn set_total_files(&self, job_id: &str, total_files: i32) -> Result<()>;

    /// Write running counters. Ignored unless the job is `processing`;
    /// counters never decrease. Counters that would break
    /// `successful + failed <= processed <= total` are rejected.
    async fn update_progress(&self, job_id: &str, counters: JobCounters) -> Result<()>;

    /// Move the job to a terminal status with its final bookkeeping.
    /// Counters are checked the same way as in `update_progress`.
    async fn finish(&self, job_id: &str, completion: JobCompletion) -> Result<UploadJob>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Similarity index holding chunk embeddings, keyed by collection and document.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries. Returns their index ids, in input order.
    async fn upsert(&self, collection_id: Uuid, records: Vec<VectorRecord>)
        -> Result<Vec<String>>;

    /// Top `k` matches at or above `score_threshold`, best first.
    async fn search(
        &self,
        collection_id: Uuid,
        vector: &Vector,
        k: i64,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>>;

    /// Remove every entry of a document. Returns the number removed.
    async fn delete_by_document(&self, collection_id: Uuid, document_id: Uuid) -> Result<u64>;
}

// =============================================================================
// EXTRACTION ADAPTER TRAITS
// =============================================================================

/// Adapter for extracting text from one file format.
///
/// Adapters are registered per [`DocumentFormat`] in an `ExtractionRegistry`
/// and tried in registration order until one succeeds.
#[async_trait]
pub trait ExtractionAdapter: Send + Sync {
    /// Extract text from raw file data.
    async fn extract(&self, data: &[u8], filename: &str, mime_type: &str)
        -> Result<ExtractionResult>;

    /// Check if the adapter's external dependencies are available.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Human-readable name of this adapter.
    fn name(&self) -> &str;
}
