use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use rifflux::chunker::make_chunk_id;
use rifflux::embedding::Embedder;
use rifflux::engine::Engine;
use rifflux::error::{Error, Result};
use rifflux::models::{ScoreBreakdown, SearchMode};
use rifflux::search::SearchService;
use rifflux::Config;

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.db_path = root.join("data").join("rifflux.db");
    config.embedding.backend = "hash".to_string();
    config.embedding.dim = 64;
    config.chunking.min_chunk_chars = 1;
    config.chunking.max_chunk_chars = 1200;
    config
}

fn write_corpus(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

async fn setup(files: &[(&str, &str)]) -> (TempDir, Arc<Engine>, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    write_corpus(&docs, files);
    let engine = Engine::init(test_config(tmp.path())).await.unwrap();
    (tmp, engine, docs)
}

const CORPUS: &[(&str, &str)] = &[
    (
        "alpha.md",
        "# Alpha\n\nRust ownership and borrowing rules for systems programming.\n",
    ),
    (
        "beta.md",
        "# Beta\n\nPython machine learning pipelines with embeddings.\n",
    ),
    (
        "gamma.md",
        "# Gamma\n\nKubernetes deployment notes and rollout strategy.\n",
    ),
];

#[tokio::test]
async fn reindex_counts_then_idempotent() {
    let (_tmp, engine, docs) = setup(CORPUS).await;

    let report = engine.reindex(vec![docs.clone()], false, true).await.unwrap();
    assert_eq!(report.indexed_files, 3);
    assert_eq!(report.skipped_files, 0);
    assert_eq!(report.deleted_files, 0);
    assert_eq!(report.embedding_model, "hash-64");
    assert_eq!(report.embedding_backend, "hash");

    let counts = engine.store().counts().await.unwrap();
    assert_eq!(counts.files, 3);
    assert!(counts.chunks >= 3);
    assert_eq!(counts.embeddings, counts.chunks);

    // Unchanged corpus: nothing re-indexed, chunk set identical.
    let before = engine.get_file("alpha.md").await.unwrap();
    let report = engine.reindex(vec![docs], false, true).await.unwrap();
    assert_eq!(report.indexed_files, 0);
    assert_eq!(report.skipped_files, 3);
    let after = engine.get_file("alpha.md").await.unwrap();
    assert_eq!(before.chunks.len(), after.chunks.len());
    for (a, b) in before.chunks.iter().zip(after.chunks.iter()) {
        assert_eq!(a.chunk_id, b.chunk_id);
        assert_eq!(a.content, b.content);
    }

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn mtime_touch_updates_stats_without_rechunk() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs.clone()], false, true).await.unwrap();

    // Bump mtime only; bytes are unchanged.
    let target = docs.join("alpha.md");
    let file = fs::File::options().write(true).open(&target).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(30))
        .unwrap();
    drop(file);

    let report = engine.reindex(vec![docs], false, true).await.unwrap();
    assert_eq!(report.indexed_files, 0);
    assert_eq!(report.skipped_files, 3);

    // Stored stat reflects the touch.
    let metadata = fs::metadata(&target).unwrap();
    let expected_ns = metadata
        .modified()
        .unwrap()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64;
    let stored = engine
        .store()
        .get_file_meta("alpha.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.mtime_ns, expected_ns);

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn content_change_rebuilds_only_that_file() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs.clone()], false, true).await.unwrap();

    fs::write(
        docs.join("beta.md"),
        "# Beta\n\nCompletely rewritten notes about zanzibar consistency.\n",
    )
    .unwrap();

    let report = engine.reindex(vec![docs], false, true).await.unwrap();
    assert_eq!(report.indexed_files, 1);
    assert_eq!(report.skipped_files, 2);

    let response = engine
        .search("zanzibar", Some(5), SearchMode::Lexical)
        .await
        .unwrap();
    assert_eq!(response.count, 1);
    assert_eq!(response.results[0].path, "beta.md");

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn prune_missing_deletes_removed_files() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs.clone()], false, true).await.unwrap();

    fs::remove_file(docs.join("gamma.md")).unwrap();

    let report = engine.reindex(vec![docs], false, true).await.unwrap();
    assert_eq!(report.deleted_files, 1);

    let err = engine.get_file("gamma.md").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let counts = engine.store().counts().await.unwrap();
    assert_eq!(counts.files, 2);

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn force_reindex_keeps_chunk_ids_stable() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs.clone()], false, true).await.unwrap();
    let before = engine.get_file("alpha.md").await.unwrap();

    let report = engine.reindex(vec![docs], true, true).await.unwrap();
    assert_eq!(report.indexed_files, 3);

    let after = engine.get_file("alpha.md").await.unwrap();
    let before_ids: Vec<_> = before.chunks.iter().map(|c| &c.chunk_id).collect();
    let after_ids: Vec<_> = after.chunks.iter().map(|c| &c.chunk_id).collect();
    assert_eq!(before_ids, after_ids);

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn chunk_ids_derive_from_path_and_index() {
    let (_tmp, engine, docs) = setup(&[(
        "notes.md",
        "# A\n\nalpha\n\n# B\n\nbeta\n",
    )])
    .await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    let file = engine.get_file("notes.md").await.unwrap();
    assert_eq!(file.chunks.len(), 2);
    assert_eq!(file.chunks[0].chunk_id, make_chunk_id("notes.md", 0));
    assert_eq!(file.chunks[0].heading_path, "A");
    assert_eq!(file.chunks[0].content, "alpha");
    assert_eq!(file.chunks[1].chunk_id, make_chunk_id("notes.md", 1));
    assert_eq!(file.chunks[1].heading_path, "B");
    assert_eq!(file.chunks[1].content, "beta");

    let detail = engine.get_chunk(&file.chunks[1].chunk_id).await.unwrap();
    assert_eq!(detail.path, "notes.md");
    assert_eq!(detail.chunk_index, 1);

    let err = engine.get_chunk("no-such-chunk").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn fts_rows_mirror_chunks_and_cascade_on_delete() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    let pool = engine.store().pool();
    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await
        .unwrap();
    let fts_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(chunk_count, fts_count);
    assert!(chunk_count > 0);

    engine.store().delete_file("alpha.md").await.unwrap();

    let chunk_count_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await
        .unwrap();
    let fts_count_after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(chunk_count_after, fts_count_after);
    assert!(chunk_count_after < chunk_count);

    // No orphan embeddings survive the cascade.
    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM embeddings e LEFT JOIN chunks c ON c.chunk_id = e.chunk_id WHERE c.chunk_id IS NULL",
    )
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(orphans, 0);

    // The deleted file is gone from lexical results too.
    let response = engine
        .search("ownership", Some(5), SearchMode::Lexical)
        .await
        .unwrap();
    assert!(response.results.iter().all(|r| r.path != "alpha.md"));

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn search_modes_isolate_breakdowns() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    let lexical = engine
        .search("kubernetes rollout", Some(10), SearchMode::Lexical)
        .await
        .unwrap();
    assert!(!lexical.results.is_empty());
    assert_eq!(lexical.results[0].path, "gamma.md");
    for result in &lexical.results {
        let json = serde_json::to_value(&result.score_breakdown).unwrap();
        assert!(json.get("bm25").is_some());
        assert!(json.get("cosine").is_none());
        assert!(json.get("rrf").is_none());
    }

    let semantic = engine
        .search("kubernetes deployment notes", Some(10), SearchMode::Semantic)
        .await
        .unwrap();
    assert!(!semantic.results.is_empty());
    for result in &semantic.results {
        let json = serde_json::to_value(&result.score_breakdown).unwrap();
        assert!(json.get("cosine").is_some());
        assert!(json.get("bm25").is_none());
    }

    let hybrid = engine
        .search("kubernetes rollout", Some(10), SearchMode::Hybrid)
        .await
        .unwrap();
    assert!(!hybrid.results.is_empty());
    let mut last_rrf = f64::INFINITY;
    for result in &hybrid.results {
        let json = serde_json::to_value(&result.score_breakdown).unwrap();
        let rrf = json.get("rrf").and_then(|v| v.as_f64()).unwrap();
        assert!(json.get("lexical_rank").is_some());
        assert!(json.get("semantic_rank").is_some());
        assert!(rrf <= last_rrf, "hybrid results must be sorted by rrf");
        last_rrf = rrf;
    }

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn top_k_bounds_and_boundary_validation() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    for mode in [SearchMode::Lexical, SearchMode::Semantic, SearchMode::Hybrid] {
        let response = engine.search("notes", Some(1), mode).await.unwrap();
        assert!(response.count <= 1);
        assert_eq!(response.count, response.results.len());
    }

    assert!(matches!(
        engine.search("notes", Some(0), SearchMode::Hybrid).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        engine.search("notes", Some(101), SearchMode::Hybrid).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        "bm25".parse::<SearchMode>(),
        Err(Error::InvalidInput(_))
    ));

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn degenerate_queries_return_empty_not_error() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    // Empty and whitespace-only queries short-circuit in every mode.
    for query in ["", "   "] {
        for mode in [SearchMode::Lexical, SearchMode::Semantic, SearchMode::Hybrid] {
            let response = engine.search(query, Some(10), mode).await.unwrap();
            assert_eq!(response.count, 0, "query {query:?} mode {mode}");
        }
    }

    // FTS-reserved punctuation compiles to no terms: lexical is empty, and
    // no mode raises a query syntax error.
    let response = engine.search("(((", Some(10), SearchMode::Lexical).await.unwrap();
    assert_eq!(response.count, 0);
    for mode in [SearchMode::Semantic, SearchMode::Hybrid] {
        engine.search("(((", Some(10), mode).await.unwrap();
    }

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn empty_corpus_searches_cleanly() {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::init(test_config(tmp.path())).await.unwrap();

    for mode in [SearchMode::Lexical, SearchMode::Semantic, SearchMode::Hybrid] {
        let response = engine.search("anything", Some(10), mode).await.unwrap();
        assert_eq!(response.count, 0);
    }

    engine.shutdown(Duration::from_secs(5)).await;
}

/// Embedder stand-in for a backend that cannot produce query vectors.
struct UnavailableEmbedder;

impl Embedder for UnavailableEmbedder {
    fn model_label(&self) -> &str {
        "unavailable"
    }
    fn dim(&self) -> usize {
        0
    }
    fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbedderUnavailable("no backend".to_string()))
    }
    fn embed_query(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }
}

#[tokio::test]
async fn unavailable_embedder_degrades_to_lexical() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    let service = SearchService::new(engine.store(), &UnavailableEmbedder, 60, 2);

    // Semantic mode: empty results, no error.
    let semantic = service
        .search("kubernetes", 10, SearchMode::Semantic)
        .await
        .unwrap();
    assert!(semantic.is_empty());

    // Hybrid reduces to the lexical ordering with null semantic ranks.
    let hybrid = service
        .search("kubernetes rollout", 10, SearchMode::Hybrid)
        .await
        .unwrap();
    let lexical = service
        .search("kubernetes rollout", 10, SearchMode::Lexical)
        .await
        .unwrap();
    assert_eq!(hybrid.len(), lexical.len());
    for (h, l) in hybrid.iter().zip(lexical.iter()) {
        assert_eq!(h.chunk_id, l.chunk_id);
        match &h.score_breakdown {
            ScoreBreakdown::Hybrid {
                lexical_rank,
                semantic_rank,
                ..
            } => {
                assert!(lexical_rank.is_some());
                assert!(semantic_rank.is_none());
            }
            other => panic!("expected hybrid breakdown, got {other:?}"),
        }
    }

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn semantic_ranks_exact_text_match_first() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    // The hash embedder maps identical token streams to identical vectors,
    // so querying a chunk's own text must rank that chunk first.
    let response = engine
        .search(
            "Rust ownership and borrowing rules for systems programming.",
            Some(3),
            SearchMode::Semantic,
        )
        .await
        .unwrap();
    assert_eq!(response.results[0].path, "alpha.md");
    match response.results[0].score_breakdown {
        ScoreBreakdown::Semantic { cosine } => assert!(cosine > 0.99),
        ref other => panic!("expected semantic breakdown, got {other:?}"),
    }

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn overlapping_roots_do_not_double_index() {
    let (_tmp, engine, docs) = setup(CORPUS).await;

    let report = engine
        .reindex(vec![docs.clone(), docs], false, true)
        .await
        .unwrap();
    assert_eq!(report.indexed_files, 3);
    assert_eq!(report.skipped_files, 0);

    let counts = engine.store().counts().await.unwrap();
    assert_eq!(counts.files, 3);

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn metadata_records_embedding_setup() {
    let (_tmp, engine, docs) = setup(CORPUS).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    let model = engine
        .store()
        .get_metadata("embedding_model")
        .await
        .unwrap();
    assert_eq!(model.as_deref(), Some("hash-64"));
    let dim = engine.store().get_metadata("embedding_dim").await.unwrap();
    assert_eq!(dim.as_deref(), Some("64"));

    let status = engine.status().await.unwrap();
    assert_eq!(status.files, 3);
    assert_eq!(status.embedding_model, "hash-64");
    assert_eq!(status.embedding_backend, "hash");

    engine.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn oversized_code_fence_survives_indexing_whole() {
    let fence_body = "let x = 1;\n".repeat(200);
    let content = format!("# Code\n\nIntro prose.\n\n```rust\n{fence_body}```\n");
    let (_tmp, engine, docs) = setup(&[("code.md", &content)]).await;
    engine.reindex(vec![docs], false, true).await.unwrap();

    let file = engine.get_file("code.md").await.unwrap();
    let fence = file
        .chunks
        .iter()
        .find(|c| c.content.starts_with("```"))
        .expect("fence chunk present");
    assert!(fence.content.len() > 1200);
    assert!(fence.content.contains("let x = 1;"));

    engine.shutdown(Duration::from_secs(5)).await;
}
