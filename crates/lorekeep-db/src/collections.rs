//! Collection repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Collection, CollectionRepository, CreateCollectionRequest, Error, Result,
};

/// PostgreSQL implementation of CollectionRepository.
pub struct PgCollectionRepository {
    pool: Pool<Postgres>,
}

impl PgCollectionRepository {
    /// Create a new PgCollectionRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const COLLECTION_COLUMNS: &str = "id, name, description, embedding_model, total_documents, \
     total_chunks, created_at_utc, updated_at_utc";

fn row_to_collection(r: &PgRow) -> Collection {
    Collection {
        id: r.get("id"),
        name: r.get("name"),
        description: r.get("description"),
        embedding_model: r.get("embedding_model"),
        total_documents: r.get("total_documents"),
        total_chunks: r.get("total_chunks"),
        created_at_utc: r.get("created_at_utc"),
        updated_at_utc: r.get("updated_at_utc"),
    }
}

/// Map a unique-violation on insert to `Conflict`.
pub(crate) fn map_unique_violation(e: sqlx::Error, what: impl FnOnce() -> String) -> Error {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return Error::Conflict(what());
        }
    }
    Error::Database(e)
}

#[async_trait]
impl CollectionRepository for PgCollectionRepository {
    async fn create(
        &self,
        req: CreateCollectionRequest,
        default_model: &str,
    ) -> Result<Collection> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Collection name is required".into()));
        }
        let id = new_v7();
        let now = Utc::now();
        let model = req
            .embedding_model
            .as_deref()
            .unwrap_or(default_model)
            .to_string();

        let row = sqlx::query(&format!(
            "INSERT INTO collection (id, name, description, embedding_model, created_at_utc, updated_at_utc)
             VALUES ($1, $2, $3, $4, $5, $5)
             RETURNING {COLLECTION_COLUMNS}"
        ))
        .bind(id)
        .bind(name)
        .bind(req.description.as_deref())
        .bind(&model)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, || format!("Collection '{}' already exists", name)))?;

        Ok(row_to_collection(&row))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Collection>> {
        let row = sqlx::query(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collection WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_collection))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let row = sqlx::query(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collection WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_collection))
    }

    async fn list(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM collection ORDER BY created_at_utc DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(row_to_collection).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Vector entries carry no foreign key, remove them explicitly.
        sqlx::query("DELETE FROM chunk_vectors WHERE collection_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        // Documents, chunks, folder nodes and upload jobs cascade.
        let result = sqlx::query("DELETE FROM collection WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn rebuild_statistics(&self, id: Uuid) -> Result<Collection> {
        let row = sqlx::query(
            r#"
            UPDATE collection c SET
                total_documents = s.docs,
                total_chunks = s.chunks,
                updated_at_utc = now()
            FROM (
                SELECT COUNT(*) AS docs, COALESCE(SUM(chunk_count), 0)::BIGINT AS chunks
                FROM document
                WHERE collection_id = $1 AND status = 'completed'
            ) s
            WHERE c.id = $1
            RETURNING c.id, c.name, c.description, c.embedding_model, c.total_documents,
                      c.total_chunks, c.created_at_utc, c.updated_at_utc
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::CollectionNotFound(id))?;

        let collection = row_to_collection(&row);
        debug!(
            subsystem = "db",
            component = "collections",
            op = "rebuild_statistics",
            collection_id = %id,
            total_documents = collection.total_documents,
            total_chunks = collection.total_chunks,
            "Collection statistics rebuilt"
        );
        Ok(collection)
    }
}
