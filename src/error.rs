//! Error kinds shared across the engine.
//!
//! Every fallible core operation returns [`Error`], which carries enough
//! classification for the callers that need it: the background worker retries
//! [`Error::Transient`], the HTTP layer maps kinds to status codes, and
//! everything else surfaces with context. Empty search results are never an
//! error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested chunk id or path is not indexed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A retryable failure, typically a SQLite lock/busy condition. Only the
    /// background worker retries these; query paths surface them.
    #[error("transient database error: {0}")]
    Transient(String),

    /// The database structure does not match what this build expects. There
    /// is no live migration path: delete the database file and reindex.
    #[error("schema mismatch: {0} (delete the database file and reindex)")]
    Schema(String),

    /// Malformed input rejected at the boundary (bad mode, out-of-range
    /// top_k, unparsable FTS query).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A query embedding could not be produced. Semantic retrieval degrades
    /// to an empty candidate list rather than failing the search.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Stable machine-readable kind label, used in job records and the HTTP
    /// error body.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Transient(_) => "transient",
            Error::Schema(_) => "schema",
            Error::InvalidInput(_) => "invalid_input",
            Error::EmbedderUnavailable(_) => "embedder_unavailable",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => classify_database_message(&db.message().to_lowercase()),
            sqlx::Error::PoolTimedOut => Error::Transient("connection pool timed out".to_string()),
            _ => Error::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(format!("io error: {err}"))
    }
}

fn classify_database_message(message: &str) -> Error {
    if message.contains("database is locked") || message.contains("database table is locked") || message.contains("busy") {
        return Error::Transient(message.to_string());
    }
    if message.contains("no such table") || message.contains("no such column") {
        return Error::Schema(message.to_string());
    }
    if is_fts_query_message(message) {
        return Error::InvalidInput(message.to_string());
    }
    Error::Internal(message.to_string())
}

/// FTS5 raises MATCH parse failures as plain database errors; they are the
/// caller's query, not our state.
fn is_fts_query_message(message: &str) -> bool {
    message.contains("fts5: syntax error")
        || message.contains("unterminated string")
        || message.contains("malformed match")
}
