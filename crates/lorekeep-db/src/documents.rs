//! Document and chunk repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Document, DocumentChunk, DocumentFootprint, DocumentRepository, DocumentStatus,
    Error, FolderPlacement, NewChunk, NewDocument, Result,
};

use crate::collections::map_unique_violation;

/// PostgreSQL implementation of DocumentRepository.
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    /// Create a new PgDocumentRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const DOCUMENT_COLUMNS: &str = "id, collection_id, upload_job_id, filename, original_filename, \
     mime_type, size_bytes, content_hash, file_path, status, error_message, chunk_count, \
     relative_path, parent_folder, folder_depth, folder_path, folder_metadata, document_tags, \
     content_category, created_at_utc, updated_at_utc";

fn row_to_document(r: &PgRow) -> Result<Document> {
    let status: String = r.get("status");
    Ok(Document {
        id: r.get("id"),
        collection_id: r.get("collection_id"),
        upload_job_id: r.get("upload_job_id"),
        filename: r.get("filename"),
        original_filename: r.get("original_filename"),
        mime_type: r.get("mime_type"),
        size_bytes: r.get("size_bytes"),
        content_hash: r.get("content_hash"),
        file_path: r.get("file_path"),
        status: status.parse::<DocumentStatus>().map_err(Error::Internal)?,
        error_message: r.get("error_message"),
        chunk_count: r.get("chunk_count"),
        placement: FolderPlacement {
            relative_path: r.get("relative_path"),
            parent_folder: r.get("parent_folder"),
            folder_depth: r.get("folder_depth"),
            folder_path: r.get("folder_path"),
            folder_metadata: r.get("folder_metadata"),
            document_tags: r.get("document_tags"),
            content_category: r.get("content_category"),
        },
        created_at_utc: r.get("created_at_utc"),
        updated_at_utc: r.get("updated_at_utc"),
    })
}

fn row_to_chunk(r: &PgRow) -> DocumentChunk {
    DocumentChunk {
        id: r.get("id"),
        document_id: r.get("document_id"),
        chunk_index: r.get("chunk_index"),
        text: r.get("text"),
        char_count: r.get("char_count"),
        start_offset: r.get("start_offset"),
        end_offset: r.get("end_offset"),
        content_hash: r.get("content_hash"),
        vector_id: r.get("vector_id"),
        created_at_utc: r.get("created_at_utc"),
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn find_by_hash(
        &self,
        collection_id: Uuid,
        content_hash: &str,
    ) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document WHERE collection_id = $1 AND content_hash = $2"
        ))
        .bind(collection_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn create_processing(&self, doc: NewDocument) -> Result<Document> {
        let id = new_v7();
        let now = Utc::now();
        let p = &doc.placement;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO document (
                id, collection_id, upload_job_id, filename, original_filename, mime_type,
                size_bytes, content_hash, file_path, status, chunk_count,
                relative_path, parent_folder, folder_depth, folder_path, folder_metadata,
                document_tags, content_category, created_at_utc, updated_at_utc
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, 'processing', 0,
                $10, $11, $12, $13, $14, $15, $16, $17, $17
            )
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(doc.collection_id)
        .bind(doc.upload_job_id)
        .bind(&doc.filename)
        .bind(&doc.original_filename)
        .bind(doc.mime_type.as_deref())
        .bind(doc.size_bytes)
        .bind(&doc.content_hash)
        .bind(doc.file_path.as_deref())
        .bind(&p.relative_path)
        .bind(p.parent_folder.as_deref())
        .bind(p.folder_depth)
        .bind(&p.folder_path)
        .bind(&p.folder_metadata)
        .bind(&p.document_tags)
        .bind(&p.content_category)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(e, || {
                format!(
                    "Document with content hash {} already exists in collection {}",
                    doc.content_hash, doc.collection_id
                )
            })
        })?;

        row_to_document(&row)
    }

    async fn complete(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<Document> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let now = Utc::now();
        let chunk_count = chunks.len() as i32;

        sqlx::query("DELETE FROM document_chunk WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunk (
                    id, document_id, chunk_index, text, char_count,
                    start_offset, end_offset, content_hash, vector_id, created_at_utc
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(new_v7())
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.text.chars().count() as i32)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(&chunk.content_hash)
            .bind(chunk.vector_id.as_deref())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE document
            SET status = 'completed', chunk_count = $2, error_message = NULL, updated_at_utc = $3
            WHERE id = $1
            RETURNING {DOCUMENT_COLUMNS}
            "#
        ))
        .bind(document_id)
        .bind(chunk_count)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::DocumentNotFound(document_id))?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "documents",
            op = "complete",
            document_id = %document_id,
            chunk_count,
            "Document completed"
        );
        row_to_document(&row)
    }

    async fn mark_failed(&self, document_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE document SET status = 'failed', error_message = $2, updated_at_utc = $3
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn retire(&self, document_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let removed = sqlx::query("DELETE FROM document_chunk WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

        sqlx::query("DELETE FROM document WHERE id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "documents",
            op = "retire",
            document_id = %document_id,
            chunks_removed = removed,
            "Document retired"
        );
        Ok(())
    }

    async fn get(&self, document_id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM document WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list(&self, collection_id: Uuid, folder_path: Option<&str>) -> Result<Vec<Document>> {
        let rows = match folder_path {
            Some(path) => sqlx::query(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM document
                 WHERE collection_id = $1 AND folder_path = $2
                 ORDER BY relative_path"
            ))
            .bind(collection_id)
            .bind(path)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?,
            None => sqlx::query(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM document
                 WHERE collection_id = $1
                 ORDER BY relative_path"
            ))
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?,
        };

        rows.iter().map(row_to_document).collect()
    }

    async fn get_chunks(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, chunk_index, text, char_count, start_offset, end_offset,
                    content_hash, vector_id, created_at_utc
             FROM document_chunk WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn footprints(&self, collection_id: Uuid) -> Result<Vec<DocumentFootprint>> {
        let rows = sqlx::query(
            "SELECT folder_path, size_bytes FROM document WHERE collection_id = $1",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|r| DocumentFootprint {
                folder_path: r.get("folder_path"),
                size_bytes: r.get("size_bytes"),
            })
            .collect())
    }
}
