//! # rifflux
//!
//! **A local, offline hybrid retrieval engine over Markdown notes.**
//!
//! rifflux turns a directory tree into a persistent, incrementally
//! maintained index of text chunks — an FTS5 inverted index plus dense
//! vector embeddings in one SQLite file — and answers ranked top-k queries
//! by fusing lexical and semantic evidence with Reciprocal Rank Fusion.
//!
//! ```text
//! ┌───────────┐    ┌─────────────────┐    ┌───────────────┐
//! │  Watcher  │───▶│ Background queue │───▶│    Indexer    │
//! └───────────┘    └─────────────────┘    │ chunk + embed │
//!                                         └───────┬───────┘
//!                                                 ▼
//!                  ┌─────────────────────────────────────┐
//!                  │       SQLite (WAL): files, chunks,  │
//!                  │       chunks_fts, embeddings        │
//!                  └───────┬──────────────────┬──────────┘
//!                          ▼                  ▼
//!                   ┌────────────┐     ┌────────────┐
//!                   │  lexical   │     │  semantic  │
//!                   │   (BM25)   │     │  (cosine)  │
//!                   └──────┬─────┘     └─────┬──────┘
//!                          └───── RRF ───────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **indexer** ([`indexer`]) scans directories, detects changes via
//!    `(mtime, size, sha256)`, runs the **chunker** ([`chunker`]) and
//!    **embedder** ([`embedding`]), and commits each file update as one
//!    transaction through the **store** ([`store`]).
//! 2. The **search service** ([`search`]) oversamples candidates from the
//!    lexical ([`lexical`]) and semantic ([`semantic`]) paths and fuses them
//!    ([`fuse`]) in hybrid mode.
//! 3. The **background indexer** ([`background`]) serializes writes on a
//!    single worker with retry/backoff; the **watcher** ([`watcher`]) feeds
//!    it debounced filesystem batches.
//! 4. The **engine** ([`engine`]) aggregates all of it with an
//!    `init → serve → shutdown` lifecycle, consumed by the CLI and the HTTP
//!    tool server ([`server`]).
//!
//! ## Search modes
//!
//! | Mode | Engine | Breakdown keys |
//! |------|--------|----------------|
//! | `lexical` | SQLite FTS5 (BM25) | `bm25` |
//! | `semantic` | Cosine over stored vectors | `cosine` |
//! | `hybrid` | Reciprocal Rank Fusion | `rrf`, `lexical_rank`, `semantic_rank` |

pub mod background;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fuse;
pub mod git;
pub mod indexer;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod search;
pub mod semantic;
pub mod server;
pub mod store;
pub mod watcher;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
