//! Collection CRUD.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;

use lorekeep_core::{Collection, CreateCollectionRequest, Error};

use crate::error::ApiError;
use crate::state::AppState;

/// Load a collection or fail with 404.
pub(crate) async fn require_collection(state: &AppState, id: Uuid) -> Result<Collection, ApiError> {
    state
        .repos
        .collections
        .get(id)
        .await?
        .ok_or_else(|| Error::CollectionNotFound(id).into())
}

pub async fn create_collection(
    State(state): State<AppState>,
    Json(body): Json<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<Collection>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Collection name is required".to_string()));
    }
    let request = CreateCollectionRequest {
        name: name.to_string(),
        ..body
    };

    let collection = state
        .repos
        .collections
        .create(request, state.embedder.model_name())
        .await?;
    info!(collection_id = %collection.id, name = %collection.name, "Collection created");
    Ok((StatusCode::CREATED, Json(collection)))
}

pub async fn list_collections(
    State(state): State<AppState>,
) -> Result<Json<Vec<Collection>>, ApiError> {
    Ok(Json(state.repos.collections.list().await?))
}

pub async fn get_collection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Collection>, ApiError> {
    Ok(Json(require_collection(&state, id).await?))
}

/// Delete a collection with its documents, chunks, vectors, jobs and folders.
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if !state.repos.collections.delete(id).await? {
        return Err(Error::CollectionNotFound(id).into());
    }
    info!(collection_id = %id, "Collection deleted");
    Ok(StatusCode::NO_CONTENT)
}
