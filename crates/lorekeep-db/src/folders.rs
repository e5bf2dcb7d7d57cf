//! Folder node repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use lorekeep_core::{
    new_v7, Error, FolderNode, FolderRepository, FolderStatistics, NewFolderNode, Result,
};

/// PostgreSQL implementation of FolderRepository.
pub struct PgFolderRepository {
    pool: Pool<Postgres>,
}

impl PgFolderRepository {
    /// Create a new PgFolderRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const FOLDER_COLUMNS: &str = "id, collection_id, upload_job_id, name, full_path, parent_id, \
     depth, document_count, total_documents, total_size_bytes, folder_metadata, auto_tags, \
     content_summary, created_at_utc, updated_at_utc";

fn row_to_folder(r: &PgRow) -> FolderNode {
    FolderNode {
        id: r.get("id"),
        collection_id: r.get("collection_id"),
        upload_job_id: r.get("upload_job_id"),
        name: r.get("name"),
        full_path: r.get("full_path"),
        parent_id: r.get("parent_id"),
        depth: r.get("depth"),
        document_count: r.get("document_count"),
        total_documents: r.get("total_documents"),
        total_size_bytes: r.get("total_size_bytes"),
        folder_metadata: r.get("folder_metadata"),
        auto_tags: r.get("auto_tags"),
        content_summary: r.get("content_summary"),
        created_at_utc: r.get("created_at_utc"),
        updated_at_utc: r.get("updated_at_utc"),
    }
}

#[async_trait]
impl FolderRepository for PgFolderRepository {
    async fn find_by_path(
        &self,
        collection_id: Uuid,
        full_path: &str,
    ) -> Result<Option<FolderNode>> {
        let row = sqlx::query(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folder_node WHERE collection_id = $1 AND full_path = $2"
        ))
        .bind(collection_id)
        .bind(full_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(row_to_folder))
    }

    async fn insert_node(&self, node: NewFolderNode) -> Result<(FolderNode, bool)> {
        let now = Utc::now();
        let metadata = serde_json::json!({ "depth": node.depth, "name": node.name });

        // A concurrent ensure_paths may win the race for the same path;
        // the unique key turns that into a lookup instead of a duplicate.
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO folder_node (
                id, collection_id, upload_job_id, name, full_path, parent_id, depth,
                folder_metadata, created_at_utc, updated_at_utc
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (collection_id, full_path) DO NOTHING
            RETURNING {FOLDER_COLUMNS}
            "#
        ))
        .bind(new_v7())
        .bind(node.collection_id)
        .bind(node.upload_job_id)
        .bind(&node.name)
        .bind(&node.full_path)
        .bind(node.parent_id)
        .bind(node.depth)
        .bind(&metadata)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if let Some(row) = inserted {
            return Ok((row_to_folder(&row), true));
        }

        let existing = self
            .find_by_path(node.collection_id, &node.full_path)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!(
                    "Folder node {} vanished after insert conflict",
                    node.full_path
                ))
            })?;
        Ok((existing, false))
    }

    async fn list(&self, collection_id: Uuid) -> Result<Vec<FolderNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folder_node WHERE collection_id = $1
             ORDER BY depth, name"
        ))
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(row_to_folder).collect())
    }

    async fn apply_statistics(&self, stats: Vec<FolderStatistics>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let now = Utc::now();

        for s in &stats {
            sqlx::query(
                r#"
                UPDATE folder_node
                SET document_count = $2, total_documents = $3, total_size_bytes = $4,
                    auto_tags = $5, updated_at_utc = $6
                WHERE id = $1
                "#,
            )
            .bind(s.folder_id)
            .bind(s.document_count)
            .bind(s.total_documents)
            .bind(s.total_size_bytes)
            .bind(&s.auto_tags)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
