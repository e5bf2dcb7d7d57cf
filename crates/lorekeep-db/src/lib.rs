//! # lorekeep-db
//!
//! PostgreSQL + pgvector storage layer for lorekeep.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for collections, documents, folder nodes and upload jobs
//! - A pgvector chunk index with cosine similarity search
//! - Folder hierarchy reconstruction and statistics
//! - Sentence-aware text chunking
//! - In-memory stores sharing the same traits, for tests and database-less runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use lorekeep_db::{CollectionRepository, CreateCollectionRequest, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/lorekeep").await?;
//!
//!     let collection = db.collections.create(CreateCollectionRequest {
//!         name: "handbook".to_string(),
//!         description: None,
//!         embedding_model: None,
//!     }, "nomic-embed-text").await?;
//!
//!     println!("Created collection: {}", collection.id);
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

pub mod chunking;
pub mod collections;
pub mod documents;
pub mod folders;
pub mod hierarchy;
pub mod memory;
pub mod pool;
pub mod upload_jobs;
pub mod vectors;


// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use lorekeep_core::*;

// Re-export chunking types
pub use chunking::{clean_text, Chunk, Chunker, ChunkerConfig, SentenceChunker};

// Re-export repository implementations
pub use collections::PgCollectionRepository;
pub use documents::PgDocumentRepository;
pub use folders::PgFolderRepository;
pub use hierarchy::{build_tree, FolderHierarchy};
pub use memory::MemoryStore;
pub use pool::{create_pool, log_pool_metrics, PoolConfig, API_RESERVED_CONNECTIONS};
pub use upload_jobs::PgUploadJobRepository;
pub use vectors::{vector_id, PgVectorIndex};

/// Storage-agnostic handles to every repository, as consumed by the
/// ingestion pipeline and the HTTP layer.
#[derive(Clone)]
pub struct Repositories {
    pub collections: Arc<dyn CollectionRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub folders: Arc<dyn FolderRepository>,
    pub upload_jobs: Arc<dyn UploadJobRepository>,
    pub vectors: Arc<dyn VectorIndex>,
}

impl Repositories {
    /// Folder tree operations over these repositories.
    pub fn hierarchy(&self) -> FolderHierarchy {
        FolderHierarchy::new(self.folders.clone(), self.documents.clone())
    }
}

impl MemoryStore {
    /// Trait-object handles over this in-memory state.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            collections: Arc::new(self.collections()),
            documents: Arc::new(self.documents()),
            folders: Arc::new(self.folders()),
            upload_jobs: Arc::new(self.upload_jobs()),
            vectors: Arc::new(self.vectors()),
        }
    }
}

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Collection repository.
    pub collections: PgCollectionRepository,
    /// Document and chunk repository.
    pub documents: PgDocumentRepository,
    /// Folder node repository.
    pub folders: PgFolderRepository,
    /// Upload job repository.
    pub upload_jobs: PgUploadJobRepository,
    /// pgvector chunk index.
    pub vectors: PgVectorIndex,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            collections: PgCollectionRepository::new(pool.clone()),
            documents: PgDocumentRepository::new(pool.clone()),
            folders: PgFolderRepository::new(pool.clone()),
            upload_jobs: PgUploadJobRepository::new(pool.clone()),
            vectors: PgVectorIndex::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create a new Database instance with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Trait-object handles backed by this database's pool.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            collections: Arc::new(PgCollectionRepository::new(self.pool.clone())),
            documents: Arc::new(PgDocumentRepository::new(self.pool.clone())),
            folders: Arc::new(PgFolderRepository::new(self.pool.clone())),
            upload_jobs: Arc::new(PgUploadJobRepository::new(self.pool.clone())),
            vectors: Arc::new(PgVectorIndex::new(self.pool.clone())),
        }
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
