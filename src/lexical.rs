//! Lexical (BM25) candidate generation over the FTS index.

use crate::error::{Error, Result};
use crate::models::LexicalHit;
use crate::store::Store;

/// Run a lexical query. Queries with no indexable terms return an empty list,
/// as does anything FTS5 refuses to parse — the caller never sees a query
/// syntax error.
pub async fn lexical_search(store: &Store, query: &str, limit: i64) -> Result<Vec<LexicalHit>> {
    let Some(compiled) = compile_fts_query(query) else {
        return Ok(Vec::new());
    };

    match store.fts_search(&compiled, limit).await {
        Ok(hits) => Ok(hits),
        Err(Error::InvalidInput(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Compile free text into a safe FTS5 MATCH expression: alphanumeric terms,
/// each quoted, OR-joined. Operators, quotes, and punctuation in the input
/// cannot reach the FTS parser. `None` when the query holds no terms.
pub fn compile_fts_query(query: &str) -> Option<String> {
    let terms: Vec<&str> = query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .collect();

    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}
