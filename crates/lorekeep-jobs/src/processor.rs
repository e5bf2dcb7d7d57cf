//! Per-file ingestion: hash, dedupe, extract, chunk, embed, persist.
//!
//! Every repository call made here is its own transaction, so a failure
//! while processing one file never rolls back a sibling's work. The
//! processor never returns an error to its caller: every failure becomes a
//! [`FileOutcome`] with `success == false`, and the document row (when one
//! was created) is marked `failed` with the captured message.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use lorekeep_core::file_safety::{detect_mime_type, extension_of, is_supported};
use lorekeep_core::hashing::hash_file;
use lorekeep_core::{
    Document, EmbeddingBackend, Error, FolderPlacement, NewChunk, NewDocument, Result,
    VectorRecord,
};
use lorekeep_db::{vector_id, Chunker, Repositories, SentenceChunker};
use lorekeep_inference::{embed_with_retry, RetryPolicy};

use crate::config::IngestConfig;
use crate::extraction::ExtractionRegistry;
use crate::scan::IngestFile;

/// Per-batch settings shared by every file of the batch.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub collection_id: Uuid,
    /// Row id of the owning upload job, recorded on documents and folder nodes.
    pub upload_job_id: Option<Uuid>,
    pub preserve_structure: bool,
    pub max_file_size_bytes: u64,
}

/// Result of processing one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub success: bool,
    pub document_id: Option<Uuid>,
    pub chunks_stored: usize,
    /// Chunks dropped because their embedding failed after retries.
    pub chunks_failed: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Previous document (same content or same path) this file replaced.
    pub replaced: Option<Uuid>,
}

struct Stored {
    document: Document,
    chunks_failed: usize,
    replaced: Option<Uuid>,
}

/// Runs the ingestion steps for a single file.
pub struct FileProcessor {
    repos: Repositories,
    embedder: Arc<dyn EmbeddingBackend>,
    extraction: Arc<ExtractionRegistry>,
    chunker: Arc<dyn Chunker>,
    retry: RetryPolicy,
}

impl FileProcessor {
    pub fn new(
        repos: Repositories,
        embedder: Arc<dyn EmbeddingBackend>,
        extraction: Arc<ExtractionRegistry>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            repos,
            embedder,
            extraction,
            chunker: Arc::new(SentenceChunker::new(config.chunker.clone())),
            retry: config.retry,
        }
    }

    /// Replace the chunking strategy.
    pub fn with_chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Process one file. Never fails; see [`FileOutcome`].
    #[instrument(
        skip(self, file, ctx),
        fields(
            subsystem = "jobs",
            component = "file_processor",
            op = "process",
            file = %file.relative_path,
            collection_id = %ctx.collection_id,
        )
    )]
    pub async fn process(&self, file: &IngestFile, ctx: &FileContext) -> FileOutcome {
        let start = Instant::now();
        let mut document_id = None;
        let result = self.run(file, ctx, &mut document_id).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(stored) => {
                debug!(
                    document_id = %stored.document.id,
                    chunk_count = stored.document.chunk_count,
                    chunks_failed = stored.chunks_failed,
                    duration_ms,
                    "File ingested"
                );
                FileOutcome {
                    file: file.relative_path.clone(),
                    success: true,
                    document_id: Some(stored.document.id),
                    chunks_stored: stored.document.chunk_count.max(0) as usize,
                    chunks_failed: stored.chunks_failed,
                    error: None,
                    duration_ms,
                    replaced: stored.replaced,
                }
            }
            Err(e) => {
                warn!(error = %e, duration_ms, "File processing failed");
                if let Some(id) = document_id {
                    self.abandon(ctx.collection_id, id, &e).await;
                }
                FileOutcome {
                    file: file.relative_path.clone(),
                    success: false,
                    document_id,
                    chunks_stored: 0,
                    chunks_failed: 0,
                    error: Some(e.to_string()),
                    duration_ms,
                    replaced: None,
                }
            }
        }
    }

    async fn run(
        &self,
        file: &IngestFile,
        ctx: &FileContext,
        document_id: &mut Option<Uuid>,
    ) -> Result<Stored> {
        let name = file.relative_path.as_str();

        if !is_supported(name) {
            let ext = extension_of(name).unwrap_or_else(|| "none".to_string());
            return Err(Error::UnsupportedFormat(format!("{} (.{})", name, ext)));
        }
        if file.size_bytes > ctx.max_file_size_bytes {
            return Err(Error::FileTooLarge {
                size: file.size_bytes,
                limit: ctx.max_file_size_bytes,
            });
        }

        let content_hash = hash_file(&file.path).await?;
        let placement = if ctx.preserve_structure {
            FolderPlacement::from_relative_path(name)
        } else {
            FolderPlacement::flat(name)
        };
        let replaced = self.replace_existing(ctx, &content_hash, &placement).await?;

        let data = tokio::fs::read(&file.path).await?;
        let mime_type = detect_mime_type(name, &data);
        let filename = name.rsplit('/').next().unwrap_or(name).to_string();

        let document = self
            .repos
            .documents
            .create_processing(NewDocument {
                collection_id: ctx.collection_id,
                upload_job_id: ctx.upload_job_id,
                filename: filename.clone(),
                original_filename: filename.clone(),
                mime_type: Some(mime_type.clone()),
                size_bytes: data.len() as i64,
                content_hash,
                file_path: Some(file.path.display().to_string()),
                placement,
            })
            .await?;
        *document_id = Some(document.id);

        let extracted = self.extraction.extract(&data, &filename, &mime_type).await?;
        drop(data);
        debug!(method = %extracted.method, chars = extracted.text.len(), "Text extracted");

        let chunks = self.chunker.chunk(&extracted.text);
        if chunks.is_empty() {
            return Err(Error::Extraction(format!(
                "No text chunks produced from {}",
                name
            )));
        }

        let total = chunks.len();
        let mut rows: Vec<NewChunk> = Vec::with_capacity(total);
        let mut records = Vec::with_capacity(total);
        let mut last_error = None;

        for chunk in &chunks {
            let embedded = embed_with_retry(
                self.embedder.as_ref(),
                std::slice::from_ref(&chunk.text),
                &self.retry,
            )
            .await
            .and_then(|mut v| {
                v.pop()
                    .ok_or_else(|| Error::Embedding("Backend returned no vector".to_string()))
            });

            match embedded {
                Ok(vector) => {
                    // Stored chunks are renumbered so indices stay contiguous
                    let index = rows.len() as i32;
                    let id = vector_id(document.id, index);
                    records.push(VectorRecord {
                        id: id.clone(),
                        document_id: document.id,
                        chunk_index: index,
                        text: chunk.text.clone(),
                        vector,
                        metadata: json!({
                            "collection_id": ctx.collection_id,
                            "filename": filename,
                            "relative_path": document.placement.relative_path,
                            "folder_path": document.placement.folder_path,
                            "content_category": document.placement.content_category,
                            "start_offset": chunk.start_offset,
                            "end_offset": chunk.end_offset,
                            "content_hash": chunk.content_hash,
                            "extraction_method": extracted.method,
                        }),
                    });
                    rows.push(chunk.to_new_chunk(index, Some(id)));
                }
                Err(e) if e.is_transient() => {
                    // Backend outage: later chunks would spend the same retry
                    // budget each, so the file fails now.
                    warn!(
                        chunk_index = chunk.index,
                        chunks_skipped = total - chunk.index - 1,
                        error = %e,
                        "Embedding backend unavailable; abandoning file"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(chunk_index = chunk.index, error = %e, "Chunk embedding rejected");
                    last_error = Some(e);
                }
            }
        }

        let chunks_failed = total - rows.len();
        if rows.is_empty() {
            let cause = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(Error::Embedding(format!(
                "All {} chunks failed to embed: {}",
                total, cause
            )));
        }

        // The relational rows are authoritative; an index write failure
        // leaves chunks without a vector reference.
        if let Err(e) = self.repos.vectors.upsert(ctx.collection_id, records).await {
            warn!(document_id = %document.id, error = %e, "Vector index write failed; chunks stored without vectors");
            for row in &mut rows {
                row.vector_id = None;
            }
        }

        let document = self.repos.documents.complete(document.id, rows).await?;
        Ok(Stored {
            document,
            chunks_failed,
            replaced,
        })
    }

    /// Retire the document this file supersedes: one with the same content,
    /// or else one stored at the same relative path.
    ///
    /// A content match created by the same upload job is a duplicate inside
    /// the batch and fails this file instead.
    async fn replace_existing(
        &self,
        ctx: &FileContext,
        content_hash: &str,
        placement: &FolderPlacement,
    ) -> Result<Option<Uuid>> {
        let existing = match self
            .repos
            .documents
            .find_by_hash(ctx.collection_id, content_hash)
            .await?
        {
            Some(existing) => {
                if ctx.upload_job_id.is_some() && existing.upload_job_id == ctx.upload_job_id {
                    return Err(Error::Conflict(format!(
                        "Duplicate content of {} in the same upload",
                        existing.placement.relative_path
                    )));
                }
                existing
            }
            None => {
                let same_path = self
                    .repos
                    .documents
                    .list(ctx.collection_id, Some(&placement.folder_path))
                    .await?
                    .into_iter()
                    .find(|d| {
                        d.placement.relative_path == placement.relative_path
                            && (ctx.upload_job_id.is_none() || d.upload_job_id != ctx.upload_job_id)
                    });
                match same_path {
                    Some(previous) => previous,
                    None => return Ok(None),
                }
            }
        };

        if let Err(e) = self
            .repos
            .vectors
            .delete_by_document(ctx.collection_id, existing.id)
            .await
        {
            warn!(document_id = %existing.id, error = %e, "Vector removal failed; continuing with retirement");
        }
        self.repos.documents.retire(existing.id).await?;
        debug!(
            document_id = %existing.id,
            relative_path = %existing.placement.relative_path,
            "Retired superseded document"
        );
        Ok(Some(existing.id))
    }

    /// Best-effort cleanup after a failure past document creation.
    async fn abandon(&self, collection_id: Uuid, document_id: Uuid, error: &Error) {
        if let Err(e) = self
            .repos
            .vectors
            .delete_by_document(collection_id, document_id)
            .await
        {
            warn!(document_id = %document_id, error = %e, "Vector cleanup failed");
        }
        if let Err(e) = self
            .repos
            .documents
            .mark_failed(document_id, &error.to_string())
            .await
        {
            warn!(document_id = %document_id, error = %e, "Could not mark document failed");
        }
    }
}
