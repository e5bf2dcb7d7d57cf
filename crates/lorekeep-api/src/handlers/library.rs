//! Documents, folder hierarchy, search and service metadata.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use lorekeep_core::paths::breadcrumb;
use lorekeep_core::{
    defaults, Breadcrumb, Collection, Document, Error, FolderNode, FolderSummary, FolderTreeNode,
    VectorMatch,
};
use lorekeep_inference::embed_with_retry;
use lorekeep_jobs::{supported_formats, SupportedFormats};

use crate::error::ApiError;
use crate::handlers::collections::require_collection;
use crate::state::AppState;

// =============================================================================
// DOCUMENTS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DocumentsQuery {
    /// Restrict to documents directly inside this folder.
    pub folder_path: Option<String>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    Query(query): Query<DocumentsQuery>,
) -> Result<Json<Vec<Document>>, ApiError> {
    require_collection(&state, collection_id).await?;
    let folder = query.folder_path.as_deref().map(|p| p.trim_matches('/'));
    let docs = state.repos.documents.list(collection_id, folder).await?;
    Ok(Json(docs))
}

// =============================================================================
// FOLDERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct FolderTreeQuery {
    pub max_depth: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct FolderTreeResponse {
    pub collection_id: Uuid,
    pub tree: Vec<FolderTreeNode>,
    pub summary: FolderSummary,
}

pub async fn folder_tree(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    Query(query): Query<FolderTreeQuery>,
) -> Result<Json<FolderTreeResponse>, ApiError> {
    require_collection(&state, collection_id).await?;
    if matches!(query.max_depth, Some(d) if d < 0) {
        return Err(ApiError::BadRequest("max_depth must be non-negative".to_string()));
    }
    let hierarchy = state.repos.hierarchy();
    let tree = hierarchy.get_tree(collection_id, query.max_depth).await?;
    let summary = hierarchy.summary(collection_id).await?;
    Ok(Json(FolderTreeResponse {
        collection_id,
        tree,
        summary,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FolderStatsQuery {
    /// Report a single folder instead of the whole collection.
    pub folder_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FolderStatsResponse {
    pub collection_id: Uuid,
    pub summary: FolderSummary,
    pub folders: Vec<FolderNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumbs: Option<Vec<Breadcrumb>>,
}

/// Flat folder statistics, or one folder with its breadcrumbs when
/// `folder_path` is given.
pub async fn folder_stats(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    Query(query): Query<FolderStatsQuery>,
) -> Result<Json<FolderStatsResponse>, ApiError> {
    require_collection(&state, collection_id).await?;
    let summary = state.repos.hierarchy().summary(collection_id).await?;

    let path = query
        .folder_path
        .as_deref()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty());

    let (folders, breadcrumbs) = match path {
        Some(path) => {
            let node = state
                .repos
                .folders
                .find_by_path(collection_id, path)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Folder {}", path)))?;
            (vec![node], Some(breadcrumb(path)))
        }
        None => (state.repos.folders.list(collection_id).await?, None),
    };

    Ok(Json(FolderStatsResponse {
        collection_id,
        summary,
        folders,
        breadcrumbs,
    }))
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub updated_folders: usize,
    pub collection: Collection,
}

/// Recompute folder and collection statistics from the stored documents.
pub async fn rebuild_folder_statistics(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
) -> Result<Json<RebuildResponse>, ApiError> {
    require_collection(&state, collection_id).await?;
    let updated_folders = state
        .repos
        .hierarchy()
        .rebuild_statistics(collection_id)
        .await?;
    let collection = state
        .repos
        .collections
        .rebuild_statistics(collection_id)
        .await?;
    info!(collection_id = %collection_id, updated_folders, "Folder statistics rebuilt");
    Ok(Json(RebuildResponse {
        updated_folders,
        collection,
    }))
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<i64>,
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<VectorMatch>,
    pub total: usize,
}

/// Semantic search over the collection's chunk vectors.
pub async fn search(
    State(state): State<AppState>,
    Path(collection_id): Path<Uuid>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    require_collection(&state, collection_id).await?;
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Query is required".to_string()));
    }
    let limit = body.limit.unwrap_or(defaults::SEARCH_LIMIT).clamp(1, 100);
    let threshold = body
        .score_threshold
        .unwrap_or(defaults::SEARCH_SCORE_THRESHOLD)
        .clamp(0.0, 1.0);

    let vectors = embed_with_retry(
        state.embedder.as_ref(),
        std::slice::from_ref(&query),
        &state.manager.config().retry,
    )
    .await?;
    let vector = vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("No embedding returned for query".to_string()))?;

    let results = state
        .repos
        .vectors
        .search(collection_id, &vector, limit, threshold)
        .await?;
    debug!(collection_id = %collection_id, hits = results.len(), "Search complete");

    Ok(Json(SearchResponse {
        total: results.len(),
        query,
        results,
    }))
}

// =============================================================================
// SERVICE
// =============================================================================

pub async fn formats(State(state): State<AppState>) -> Json<SupportedFormats> {
    let mut formats = supported_formats(state.manager.config().max_file_size_mb);
    formats.max_batch_files = state.config.max_batch_files;
    Json(formats)
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "embedding_model": state.embedder.model_name(),
        "running_jobs": state.manager.running_jobs().await.len(),
    }))
}
