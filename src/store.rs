//! SQLite persistence for files, chunks, the FTS index, embeddings, and
//! index metadata.
//!
//! Every write belonging to one file update happens inside a single
//! transaction: a partial failure leaves the previous state intact. Chunk
//! deletions are issued explicitly (rather than left to the file cascade) so
//! the FTS delete triggers observe each removed row; embeddings ride on the
//! chunk cascade.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::embedding::vec_to_blob;
use crate::error::{Error, Result};
use crate::models::{
    Chunk, ChunkDetail, FileChunkEntry, FileChunks, FileMeta, IndexCounts, LexicalHit,
};

/// One stored embedding joined with its chunk metadata, as consumed by the
/// semantic scan.
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub chunk_id: String,
    pub dim: i64,
    pub vec: Vec<u8>,
    pub path: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub content: String,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- file metadata -------------------------------------------------------

    pub async fn get_file_meta(&self, path: &str) -> Result<Option<FileMeta>> {
        let row = sqlx::query("SELECT id, mtime_ns, size_bytes, sha256 FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| FileMeta {
            id: r.get("id"),
            mtime_ns: r.get("mtime_ns"),
            size_bytes: r.get("size_bytes"),
            sha256: r.get("sha256"),
        }))
    }

    /// Bulk-load all file metadata, keyed by path. One query instead of one
    /// per candidate file during change detection.
    pub async fn get_all_file_meta(&self) -> Result<HashMap<String, FileMeta>> {
        let rows = sqlx::query("SELECT id, path, mtime_ns, size_bytes, sha256 FROM files")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.get::<String, _>("path"),
                    FileMeta {
                        id: r.get("id"),
                        mtime_ns: r.get("mtime_ns"),
                        size_bytes: r.get("size_bytes"),
                        sha256: r.get("sha256"),
                    },
                )
            })
            .collect())
    }

    /// Refresh only `(mtime_ns, size_bytes)` for a file whose content hash is
    /// unchanged. No chunk or embedding rows are touched.
    pub async fn touch_file(&self, path: &str, mtime_ns: i64, size_bytes: i64) -> Result<()> {
        sqlx::query("UPDATE files SET mtime_ns = ?, size_bytes = ? WHERE path = ?")
            .bind(mtime_ns)
            .bind(size_bytes)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- file update ---------------------------------------------------------

    /// Replace a file's entire chunk set in one transaction: upsert the file
    /// row, delete the previous chunks (FTS rows via triggers, embeddings via
    /// cascade), insert the new chunks and their embeddings.
    ///
    /// `vectors` must be index-aligned with `chunks`.
    pub async fn apply_file_update(
        &self,
        path: &str,
        mtime_ns: i64,
        size_bytes: i64,
        sha256: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        debug_assert_eq!(chunks.len(), vectors.len());

        let mut tx = self.pool.begin().await?;

        let file_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO files(path, mtime_ns, size_bytes, sha256)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                mtime_ns = excluded.mtime_ns,
                size_bytes = excluded.size_bytes,
                sha256 = excluded.sha256
            RETURNING id
            "#,
        )
        .bind(path)
        .bind(mtime_ns)
        .bind(size_bytes)
        .bind(sha256)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks(chunk_id, file_id, chunk_index, heading_path, content, token_count)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(file_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.heading_path)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO embeddings(chunk_id, model, dim, vec)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dim = excluded.dim,
                    vec = excluded.vec,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // -- deletion ------------------------------------------------------------

    /// Delete one file and everything hanging off it.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let file_id: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE path = ?")
            .bind(path)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(file_id) = file_id else {
            return Err(Error::NotFound(format!("file not indexed: {path}")));
        };

        sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Prune: delete every tracked file whose path is not in `seen`,
    /// returning how many were removed. An empty `seen` clears the index.
    pub async fn delete_files_except(&self, seen: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let count: u64 = if seen.is_empty() {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
                .fetch_one(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
            count as u64
        } else {
            let placeholders = vec!["?"; seen.len()].join(", ");

            let count_sql =
                format!("SELECT COUNT(*) FROM files WHERE path NOT IN ({placeholders})");
            let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
            for path in seen {
                count_query = count_query.bind(path);
            }
            let count = count_query.fetch_one(&mut *tx).await?;

            let chunks_sql = format!(
                "DELETE FROM chunks WHERE file_id IN (SELECT id FROM files WHERE path NOT IN ({placeholders}))"
            );
            let mut chunks_query = sqlx::query(&chunks_sql);
            for path in seen {
                chunks_query = chunks_query.bind(path);
            }
            chunks_query.execute(&mut *tx).await?;

            let files_sql = format!("DELETE FROM files WHERE path NOT IN ({placeholders})");
            let mut files_query = sqlx::query(&files_sql);
            for path in seen {
                files_query = files_query.bind(path);
            }
            files_query.execute(&mut *tx).await?;

            count as u64
        };

        tx.commit().await?;
        Ok(count)
    }

    // -- lookups -------------------------------------------------------------

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<ChunkDetail> {
        let row = sqlx::query(
            r#"
            SELECT c.chunk_id, f.path, c.heading_path, c.chunk_index, c.content
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE c.chunk_id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| Error::NotFound(format!("chunk not indexed: {chunk_id}")))?;
        Ok(ChunkDetail {
            chunk_id: row.get("chunk_id"),
            path: row.get("path"),
            heading_path: row.get("heading_path"),
            chunk_index: row.get("chunk_index"),
            content: row.get("content"),
        })
    }

    pub async fn get_file(&self, path: &str) -> Result<FileChunks> {
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.heading_path, c.chunk_index, c.content
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE f.path = ?
            ORDER BY c.chunk_index ASC
            "#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::NotFound(format!("file not indexed: {path}")));
        }

        Ok(FileChunks {
            path: path.to_string(),
            chunks: rows
                .into_iter()
                .map(|r| FileChunkEntry {
                    chunk_id: r.get("chunk_id"),
                    chunk_index: r.get("chunk_index"),
                    heading_path: r.get("heading_path"),
                    content: r.get("content"),
                })
                .collect(),
        })
    }

    // -- retrieval -----------------------------------------------------------

    /// Run a compiled FTS5 MATCH expression, ordered by raw BM25 (ascending:
    /// more negative is better), joined with chunk and file metadata.
    pub async fn fts_search(&self, match_expr: &str, limit: i64) -> Result<Vec<LexicalHit>> {
        let rows = sqlx::query(
            r#"
            SELECT
                c.chunk_id,
                f.path,
                c.heading_path,
                c.chunk_index,
                c.content,
                bm25(chunks_fts) AS bm25_score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            JOIN files f ON f.id = c.file_id
            WHERE chunks_fts MATCH ?
            ORDER BY bm25(chunks_fts)
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LexicalHit {
                chunk_id: r.get("chunk_id"),
                path: r.get("path"),
                heading_path: r.get("heading_path"),
                chunk_index: r.get("chunk_index"),
                content: r.get("content"),
                bm25: r.get("bm25_score"),
            })
            .collect())
    }

    /// Stream every stored embedding with its chunk metadata for cosine
    /// scoring.
    pub async fn all_embeddings(&self) -> Result<Vec<EmbeddingRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                e.chunk_id,
                e.dim,
                e.vec,
                f.path,
                c.heading_path,
                c.chunk_index,
                c.content
            FROM embeddings e
            JOIN chunks c ON c.chunk_id = e.chunk_id
            JOIN files f ON f.id = c.file_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| EmbeddingRow {
                chunk_id: r.get("chunk_id"),
                dim: r.get("dim"),
                vec: r.get("vec"),
                path: r.get("path"),
                heading_path: r.get("heading_path"),
                chunk_index: r.get("chunk_index"),
                content: r.get("content"),
            })
            .collect())
    }

    // -- status & metadata ---------------------------------------------------

    pub async fn counts(&self) -> Result<IndexCounts> {
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexCounts {
            files,
            chunks,
            embeddings,
        })
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_metadata(key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_metadata WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    pub async fn delete_metadata(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_metadata WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
