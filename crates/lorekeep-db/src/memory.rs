//! In-memory repository implementations for tests and database-less runs.
//!
//! All stores share one [`MemoryStore`] state behind a `tokio::sync::RwLock`,
//! so deleting a collection cascades the way the SQL schema does. Uniqueness
//! rules and forward-only job transitions match the PostgreSQL repositories.
//! Vector search is brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Collection, CollectionRepository, CreateCollectionRequest, Document, DocumentChunk,
    DocumentFootprint, DocumentRepository, DocumentStatus, Error, FolderNode, FolderRepository,
    FolderStatistics, FolderStructure, JobCompletion, JobCounters, NewChunk, NewDocument,
    NewFolderNode, NewUploadJob, Result, UploadJob, UploadJobRepository, UploadJobStatus, Vector,
    VectorIndex, VectorMatch, VectorRecord,
};

use crate::upload_jobs::counters_rejected;

struct StoredVector {
    collection_id: Uuid,
    record: VectorRecord,
}

#[derive(Default)]
struct State {
    collections: HashMap<Uuid, Collection>,
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Vec<DocumentChunk>>,
    folders: HashMap<Uuid, FolderNode>,
    jobs: HashMap<String, UploadJob>,
    vectors: HashMap<String, StoredVector>,
}

/// Shared in-memory state handing out one handle per repository trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collections(&self) -> MemoryCollections {
        MemoryCollections(self.state.clone())
    }

    pub fn documents(&self) -> MemoryDocuments {
        MemoryDocuments(self.state.clone())
    }

    pub fn folders(&self) -> MemoryFolders {
        MemoryFolders(self.state.clone())
    }

    pub fn upload_jobs(&self) -> MemoryUploadJobs {
        MemoryUploadJobs(self.state.clone())
    }

    pub fn vectors(&self) -> MemoryVectorIndex {
        MemoryVectorIndex(self.state.clone())
    }
}

pub struct MemoryCollections(Arc<RwLock<State>>);
pub struct MemoryDocuments(Arc<RwLock<State>>);
pub struct MemoryFolders(Arc<RwLock<State>>);
pub struct MemoryUploadJobs(Arc<RwLock<State>>);
pub struct MemoryVectorIndex(Arc<RwLock<State>>);

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn remove_document(state: &mut State, document_id: Uuid) {
    state.chunks.remove(&document_id);
    state.documents.remove(&document_id);
}

// =============================================================================
// COLLECTIONS
// =============================================================================

#[async_trait]
impl CollectionRepository for MemoryCollections {
    async fn create(
        &self,
        req: CreateCollectionRequest,
        default_model: &str,
    ) -> Result<Collection> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Collection name is required".into()));
        }
        let mut state = self.0.write().await;
        if state.collections.values().any(|c| c.name == name) {
            return Err(Error::Conflict(format!("Collection '{}' already exists", name)));
        }
        let now = Utc::now();
        let collection = Collection {
            id: new_v7(),
            name: name.to_string(),
            description: req.description,
            embedding_model: req
                .embedding_model
                .unwrap_or_else(|| default_model.to_string()),
            total_documents: 0,
            total_chunks: 0,
            created_at_utc: now,
            updated_at_utc: now,
        };
        state.collections.insert(collection.id, collection.clone());
        Ok(collection)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Collection>> {
        Ok(self.0.read().await.collections.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let state = self.0.read().await;
        Ok(state.collections.values().find(|c| c.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<Collection>> {
        let state = self.0.read().await;
        let mut all: Vec<Collection> = state.collections.values().cloned().collect();
        all.sort_by(|a, b| {
            b.created_at_utc
                .cmp(&a.created_at_utc)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(all)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.0.write().await;
        if state.collections.remove(&id).is_none() {
            return Ok(false);
        }
        let doc_ids: Vec<Uuid> = state
            .documents
            .values()
            .filter(|d| d.collection_id == id)
            .map(|d| d.id)
            .collect();
        for doc_id in doc_ids {
            remove_document(&mut state, doc_id);
        }
        state.folders.retain(|_, f| f.collection_id != id);
        state.jobs.retain(|_, j| j.collection_id != id);
        state.vectors.retain(|_, v| v.collection_id != id);
        Ok(true)
    }

    async fn rebuild_statistics(&self, id: Uuid) -> Result<Collection> {
        let mut state = self.0.write().await;
        let (docs, chunks) = state
            .documents
            .values()
            .filter(|d| d.collection_id == id && d.status == DocumentStatus::Completed)
            .fold((0i64, 0i64), |(n, c), d| (n + 1, c + i64::from(d.chunk_count)));
        let collection = state
            .collections
            .get_mut(&id)
            .ok_or(Error::CollectionNotFound(id))?;
        collection.total_documents = docs;
        collection.total_chunks = chunks;
        collection.updated_at_utc = Utc::now();
        Ok(collection.clone())
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

#[async_trait]
impl DocumentRepository for MemoryDocuments {
    async fn find_by_hash(
        &self,
        collection_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let state = self.0.read().await;
        Ok(state
            .documents
            .values()
            .find(|d| d.collection_id == collection_id && d.content_hash == content_hash)
            .cloned())
    }

    async fn create_processing(&self, doc: NewDocument) -> Result<Document> {
        let mut state = self.0.write().await;
        if !state.collections.contains_key(&doc.collection_id) {
            return Err(Error::CollectionNotFound(doc.collection_id));
        }
        if state
            .documents
            .values()
            .any(|d| d.collection_id == doc.collection_id && d.content_hash == doc.content_hash)
        {
            return Err(Error::Conflict(format!(
                "Document with content hash {} already exists in collection {}",
                doc.content_hash, doc.collection_id
            )));
        }
        let now = Utc::now();
        let document = Document {
            id: new_v7(),
            collection_id: doc.collection_id,
            upload_job_id: doc.upload_job_id,
            filename: doc.filename,
            original_filename: doc.original_filename,
            mime_type: doc.mime_type,
            size_bytes: doc.size_bytes,
            content_hash: doc.content_hash,
            file_path: doc.file_path,
            status: DocumentStatus::Processing,
            error_message: None,
            chunk_count: 0,
            placement: doc.placement,
            created_at_utc: now,
            updated_at_utc: now,
        };
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn complete(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<Document> {
        let mut state = self.0.write().await;
        let now = Utc::now();
        let document = state
            .documents
            .get_mut(&document_id)
            .ok_or(Error::DocumentNotFound(document_id))?;
        document.status = DocumentStatus::Completed;
        document.chunk_count = chunks.len() as i32;
        document.error_message = None;
        document.updated_at_utc = now;
        let document = document.clone();

        let rows = chunks
            .into_iter()
            .map(|c| DocumentChunk {
                id: new_v7(),
                document_id,
                chunk_index: c.chunk_index,
                char_count: c.text.chars().count() as i32,
                text: c.text,
                start_offset: c.start_offset,
                end_offset: c.end_offset,
                content_hash: c.content_hash,
                vector_id: c.vector_id,
                created_at_utc: now,
            })
            .collect();
        state.chunks.insert(document_id, rows);
        Ok(document)
    }

    async fn mark_failed(&self, document_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.0.write().await;
        if let Some(document) = state.documents.get_mut(&document_id) {
            document.status = DocumentStatus::Failed;
            document.error_message = Some(error.to_string());
            document.updated_at_utc = Utc::now();
        }
        Ok(())
    }

    async fn retire(&self, document_id: Uuid) -> Result<()> {
        remove_document(&mut *self.0.write().await, document_id);
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<Document>> {
        Ok(self.0.read().await.documents.get(&document_id).cloned())
    }

    async fn list(&self, collection_id: Uuid, folder_path: Option<&str>) -> Result<Vec<Document>> {
        let state = self.0.read().await;
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.collection_id == collection_id)
            .filter(|d| folder_path.map_or(true, |p| d.placement.folder_path == p))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.placement.relative_path.cmp(&b.placement.relative_path));
        Ok(docs)
    }

    async fn get_chunks(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let state = self.0.read().await;
        let mut chunks = state.chunks.get(&document_id).cloned().unwrap_or_default();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn footprints(&self, collection_id: Uuid) -> Result<Vec<DocumentFootprint>> {
        let state = self.0.read().await;
        Ok(state
            .documents
            .values()
            .filter(|d| d.collection_id == collection_id)
            .map(|d| DocumentFootprint {
                folder_path: d.placement.folder_path.clone(),
                size_bytes: d.size_bytes,
            })
            .collect())
    }
}

// =============================================================================
// FOLDERS
// =============================================================================

#[async_trait]
impl FolderRepository for MemoryFolders {
    async fn find_by_path(
        &self,
        collection_id: Uuid,
        full_path: &str,
    ) -> Result<Option<FolderNode>> {
        let state = self.0.read().await;
        Ok(state
            .folders
            .values()
            .find(|f| f.collection_id == collection_id && f.full_path == full_path)
            .cloned())
    }

    async fn insert_node(&self, node: NewFolderNode) -> Result<(FolderNode, bool)> {
        let mut state = self.0.write().await;
        if let Some(existing) = state
            .folders
            .values()
            .find(|f| f.collection_id == node.collection_id && f.full_path == node.full_path)
        {
            return Ok((existing.clone(), false));
        }
        let now = Utc::now();
        let folder = FolderNode {
            id: new_v7(),
            collection_id: node.collection_id,
            upload_job_id: node.upload_job_id,
            folder_metadata: serde_json::json!({ "depth": node.depth, "name": node.name }),
            name: node.name,
            full_path: node.full_path,
            parent_id: node.parent_id,
            depth: node.depth,
            document_count: 0,
            total_documents: 0,
            total_size_bytes: 0,
            auto_tags: Vec::new(),
            content_summary: None,
            created_at_utc: now,
            updated_at_utc: now,
        };
        state.folders.insert(folder.id, folder.clone());
        Ok((folder, true))
    }

    async fn list(&self, collection_id: Uuid) -> Result<Vec<FolderNode>> {
        let state = self.0.read().await;
        let mut nodes: Vec<FolderNode> = state
            .folders
            .values()
            .filter(|f| f.collection_id == collection_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.name.cmp(&b.name)));
        Ok(nodes)
    }

    async fn apply_statistics(&self, stats: Vec<FolderStatistics>) -> Result<()> {
        let mut state = self.0.write().await;
        let now = Utc::now();
        for s in stats {
            if let Some(folder) = state.folders.get_mut(&s.folder_id) {
                folder.document_count = s.document_count;
                folder.total_documents = s.total_documents;
                folder.total_size_bytes = s.total_size_bytes;
                folder.auto_tags = s.auto_tags;
                folder.updated_at_utc = now;
            }
        }
        Ok(())
    }
}

// =============================================================================
// UPLOAD JOBS
// =============================================================================

fn transition(state: &mut State, job_id: &str, to: UploadJobStatus) -> Result<()> {
    let job = state
        .jobs
        .get(job_id)
        .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
    if !to.predecessors().contains(&job.status) {
        return Err(Error::InvalidTransition {
            from: job.status.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}

fn checked_counters(job: &UploadJob, c: JobCounters) -> Result<JobCounters> {
    let merged = job.counters().merge(c);
    if !merged.fits(job.total_files) {
        return Err(counters_rejected(job.total_files, merged));
    }
    Ok(merged)
}

fn apply_counters(job: &mut UploadJob, c: JobCounters) {
    job.processed_files = c.processed_files;
    job.successful_files = c.successful_files;
    job.failed_files = c.failed_files;
}

#[async_trait]
impl UploadJobRepository for MemoryUploadJobs {
    async fn create(&self, job: NewUploadJob) -> Result<UploadJob> {
        let mut state = self.0.write().await;
        if !state.collections.contains_key(&job.collection_id) {
            return Err(Error::CollectionNotFound(job.collection_id));
        }
        if state.jobs.contains_key(&job.job_id) {
            return Err(Error::Conflict(format!("Upload job {} already exists", job.job_id)));
        }
        let now = Utc::now();
        let created = UploadJob {
            id: new_v7(),
            job_id: job.job_id,
            collection_id: job.collection_id,
            status: UploadJobStatus::Pending,
            total_files: 0,
            processed_files: 0,
            successful_files: 0,
            failed_files: 0,
            source: job.source,
            options: job.options,
            folder_structure: None,
            error_log: Vec::new(),
            successful_paths: Vec::new(),
            created_at_utc: now,
            started_at_utc: None,
            completed_at_utc: None,
            updated_at_utc: now,
        };
        state.jobs.insert(created.job_id.clone(), created.clone());
        Ok(created)
    }

    async fn get(&self, job_id: &str) -> Result<Option<UploadJob>> {
        Ok(self.0.read().await.jobs.get(job_id).cloned())
    }

    async fn list(
        &self,
        collection_id: Uuid,
        status: Option<UploadJobStatus>,
        limit: i64,
    ) -> Result<Vec<UploadJob>> {
        let state = self.0.read().await;
        let mut jobs: Vec<UploadJob> = state
            .jobs
            .values()
            .filter(|j| j.collection_id == collection_id)
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at_utc
                .cmp(&a.created_at_utc)
                .then_with(|| b.id.cmp(&a.id))
        });
        jobs.truncate(limit.max(1) as usize);
        Ok(jobs)
    }

    async fn mark_processing(&self, job_id: &str) -> Result<UploadJob> {
        let mut state = self.0.write().await;
        transition(&mut state, job_id, UploadJobStatus::Processing)?;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        let now = Utc::now();
        job.status = UploadJobStatus::Processing;
        job.started_at_utc = Some(now);
        job.updated_at_utc = now;
        Ok(job.clone())
    }

    async fn record_file_set(
        &self,
        job_id: &str,
        total_files: i32,
        structure: FolderStructure,
    ) -> Result<()> {
        let mut state = self.0.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        if job.status != UploadJobStatus::Processing {
            return Err(Error::InvalidTransition {
                from: job.status.to_string(),
                to: UploadJobStatus::Processing.to_string(),
            });
        }
        job.total_files = total_files;
        job.folder_structure = Some(structure);
        job.updated_at_utc = Utc::now();
        Ok(())
    }

    async fn set_total_files(&self, job_id: &str, total_files: i32) -> Result<()> {
        let mut state = self.0.write().await;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        if job.status != UploadJobStatus::Processing {
            return Err(Error::InvalidTransition {
                from: job.status.to_string(),
                to: UploadJobStatus::Processing.to_string(),
            });
        }
        if total_files < job.processed_files {
            return Err(counters_rejected(total_files, job.counters()));
        }
        job.total_files = total_files;
        job.updated_at_utc = Utc::now();
        Ok(())
    }

    async fn update_progress(&self, job_id: &str, counters: JobCounters) -> Result<()> {
        let mut state = self.0.write().await;
        if let Some(job) = state.jobs.get_mut(job_id) {
            if job.status == UploadJobStatus::Processing {
                let merged = checked_counters(job, counters)?;
                apply_counters(job, merged);
                job.updated_at_utc = Utc::now();
            }
        }
        Ok(())
    }

    async fn finish(&self, job_id: &str, completion: JobCompletion) -> Result<UploadJob> {
        let to = completion.status;
        if !to.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "finish requires a terminal status, got {}",
                to
            )));
        }
        let mut state = self.0.write().await;
        transition(&mut state, job_id, to)?;
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        let merged = checked_counters(job, completion.counters)?;
        let now = Utc::now();
        apply_counters(job, merged);
        job.status = to;
        job.error_log = completion.error_log;
        job.successful_paths = completion.successful_paths;
        job.completed_at_utc = Some(now);
        job.updated_at_utc = now;
        Ok(job.clone())
    }
}

// =============================================================================
// VECTOR INDEX
// =============================================================================

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, collection_id: Uuid, records: Vec<VectorRecord>) -> Result<Vec<String>> {
        let mut state = self.0.write().await;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(record.id.clone());
            state.vectors.insert(
                record.id.clone(),
                StoredVector {
                    collection_id,
                    record,
                },
            );
        }
        Ok(ids)
    }

    async fn search(
        &self,
        collection_id: Uuid,
        vector: &Vector,
        k: i64,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let state = self.0.read().await;
        let query = vector.as_slice();
        let mut matches: Vec<VectorMatch> = state
            .vectors
            .values()
            .filter(|v| v.collection_id == collection_id)
            .map(|v| VectorMatch {
                vector_id: v.record.id.clone(),
                document_id: v.record.document_id,
                chunk_index: v.record.chunk_index,
                text: v.record.text.clone(),
                score: cosine_sim(v.record.vector.as_slice(), query),
            })
            .filter(|m| m.score >= score_threshold)
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(k.max(1) as usize);
        Ok(matches)
    }

    async fn delete_by_document(&self, collection_id: Uuid, document_id: Uuid) -> Result<u64> {
        let mut state = self.0.write().await;
        let before = state.vectors.len();
        state
            .vectors
            .retain(|_, v| !(v.collection_id == collection_id && v.record.document_id == document_id));
        Ok((before - state.vectors.len()) as u64)
    }
}
