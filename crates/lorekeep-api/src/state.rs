//! Shared handler state.

use std::sync::Arc;

use lorekeep_core::{EmbeddingBackend, EventBus};
use lorekeep_db::Repositories;
use lorekeep_jobs::{ExtractionRegistry, IngestConfig, UploadManager};

use crate::config::ServerConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub manager: UploadManager,
    /// Used for query embeddings; ingestion goes through the manager.
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the upload manager over `repos` and `embedder`.
    pub fn new(
        repos: Repositories,
        embedder: Arc<dyn EmbeddingBackend>,
        ingest: IngestConfig,
        config: ServerConfig,
    ) -> Self {
        let manager = UploadManager::new(
            repos.clone(),
            embedder.clone(),
            Arc::new(ExtractionRegistry::with_defaults()),
            ingest,
            EventBus::new(config.event_bus_capacity),
        );
        Self {
            repos,
            manager,
            embedder,
            config: Arc::new(config),
        }
    }
}
