//! Database schema.
//!
//! Creates all tables and ensures idempotent execution; `rifflux init` can be
//! run any number of times. There is no live migration path — an incompatible
//! schema means deleting the database file and reindexing.
//!
//! ```text
//! ┌──────────────┐      ┌──────────────────┐      ┌──────────────┐
//! │    files     │─┐    │     chunks       │─┐    │  embeddings  │
//! │ id (PK)      │ │    │ id (PK)          │ │    │ chunk_id(PK) │
//! │ path UNIQUE  │ └───▶│ file_id (FK)     │ └───▶│ model        │
//! │ mtime_ns     │      │ chunk_id UNIQUE  │      │ dim          │
//! │ size_bytes   │      │ chunk_index      │      │ vec BLOB     │
//! │ sha256       │      │ heading_path     │      │ updated_at   │
//! └──────────────┘      │ content          │      └──────────────┘
//!                       │ token_count      │
//!                       └────────┬─────────┘      ┌────────────────┐
//!                                │ triggers       │ index_metadata │
//!                       ┌────────▼─────────┐      │ key (PK)       │
//!                       │   chunks_fts     │      │ value          │
//!                       │ (external FTS5)  │      │ updated_at     │
//!                       └──────────────────┘      └────────────────┘
//! ```
//!
//! `chunks_fts` is an external-content FTS5 table over `chunks`, kept
//! coherent by insert/delete/update triggers. Deleting a file cascades to its
//! chunks, whose delete triggers remove the FTS rows, and the chunk cascade
//! removes embeddings.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            mtime_ns INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id TEXT NOT NULL UNIQUE,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            heading_path TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id, chunk_index)",
    )
    .execute(pool)
    .await?;

    // FTS5 virtual tables are not idempotent natively, check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                content,
                heading_path,
                chunk_id UNINDEXED,
                content='chunks',
                content_rowid='id',
                tokenize='unicode61 remove_diacritics 2'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS chunks_fts_after_insert AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, content, heading_path, chunk_id)
            VALUES (new.id, new.content, new.heading_path, new.chunk_id);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS chunks_fts_after_delete AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content, heading_path, chunk_id)
            VALUES ('delete', old.id, old.content, old.heading_path, old.chunk_id);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS chunks_fts_after_update AFTER UPDATE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content, heading_path, chunk_id)
            VALUES ('delete', old.id, old.content, old.heading_path, old.chunk_id);
            INSERT INTO chunks_fts(rowid, content, heading_path, chunk_id)
            VALUES (new.id, new.content, new.heading_path, new.chunk_id);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY REFERENCES chunks(chunk_id) ON DELETE CASCADE,
            model TEXT NOT NULL,
            dim INTEGER NOT NULL,
            vec BLOB NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
