//! pgvector-backed chunk index.
//!
//! Entries live in `chunk_vectors`, keyed by a deterministic id
//! (`<document_id>:<chunk_index>`) so re-upserting a chunk replaces it.
//! Similarity is cosine: `score = 1 - (embedding <=> query)`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lorekeep_core::{Error, Result, Vector, VectorIndex, VectorMatch, VectorRecord};

/// Deterministic index id of a document chunk.
pub fn vector_id(document_id: Uuid, chunk_index: i32) -> String {
    format!("{}:{}", document_id, chunk_index)
}

fn index_err(e: sqlx::Error) -> Error {
    Error::VectorIndex(e.to_string())
}

/// PostgreSQL + pgvector implementation of VectorIndex.
pub struct PgVectorIndex {
    pool: Pool<Postgres>,
}

impl PgVectorIndex {
    /// Create a new PgVectorIndex with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(&self, collection_id: Uuid, records: Vec<VectorRecord>) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(index_err)?;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(records.len());

        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (id, collection_id, document_id, chunk_index, text,
                                           embedding, metadata, created_at_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE
                SET text = EXCLUDED.text, embedding = EXCLUDED.embedding,
                    metadata = EXCLUDED.metadata, chunk_index = EXCLUDED.chunk_index
                "#,
            )
            .bind(&record.id)
            .bind(collection_id)
            .bind(record.document_id)
            .bind(record.chunk_index)
            .bind(&record.text)
            .bind(&record.vector)
            .bind(&record.metadata)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(index_err)?;
            ids.push(record.id.clone());
        }

        tx.commit().await.map_err(index_err)?;
        debug!(
            subsystem = "db",
            component = "vectors",
            op = "upsert",
            collection_id = %collection_id,
            count = ids.len(),
            "Vectors upserted"
        );
        Ok(ids)
    }

    async fn search(
        &self,
        collection_id: Uuid,
        vector: &Vector,
        k: i64,
        score_threshold: f32,
    ) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text,
                   (1 - (embedding <=> $2))::REAL AS score
            FROM chunk_vectors
            WHERE collection_id = $1
              AND 1 - (embedding <=> $2) >= $3
            ORDER BY embedding <=> $2
            LIMIT $4
            "#,
        )
        .bind(collection_id)
        .bind(vector)
        .bind(f64::from(score_threshold))
        .bind(k.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(index_err)?;

        Ok(rows
            .iter()
            .map(|r| VectorMatch {
                vector_id: r.get("id"),
                document_id: r.get("document_id"),
                chunk_index: r.get("chunk_index"),
                text: r.get("text"),
                score: r.get("score"),
            })
            .collect())
    }

    async fn delete_by_document(&self, collection_id: Uuid, document_id: Uuid) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM chunk_vectors WHERE collection_id = $1 AND document_id = $2")
                .bind(collection_id)
                .bind(document_id)
                .execute(&self.pool)
                .await
                .map_err(index_err)?;
        Ok(result.rows_affected())
    }
}
