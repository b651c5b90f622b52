//! Library-level tests of the full pipeline: chunk, embed, build, persist,
//! reload, and query through the service.

mod common;

use apidoc_rag::build_cmd::build_knowledge_base;
use apidoc_rag::progress::{BuildProgressEvent, BuildProgressReporter, NoProgress};
use apidoc_rag::service::QueryService;
use apidoc_rag::source_chunk::{convert_source_to_markdown, load_corpus, SourceFormat};
use apidoc_rag::store;
use apidoc_rag_core::cache::CacheCapacity;
use apidoc_rag_core::chunk::{chunk_markdown, BoundaryMode};
use apidoc_rag_core::embedding::{BatchPolicy, CharEstimateCounter};
use apidoc_rag_core::retrieval::RetrievalParams;
use apidoc_rag_core::{Category, Corpus};
use common::{build_fixture_kb, save_kb, KeywordEmbedder, API_DOC, MOVE_ACTOR_BLOCK, PYTHON_MODULE};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn service_over(kb: apidoc_rag_core::index::KnowledgeBase) -> QueryService {
    QueryService::from_parts(
        kb,
        Arc::new(KeywordEmbedder::default()),
        RetrievalParams::default(),
        CacheCapacity::default(),
    )
}

#[test]
fn test_functions_section_is_not_chunked() {
    let corpus = chunk_markdown(API_DOC, BoundaryMode::Lenient).unwrap();
    assert_eq!(corpus.classes.len(), 2);
    assert_eq!(corpus.methods.len(), 3);
    assert!(corpus
        .methods
        .iter()
        .all(|m| !m.text.contains("Never chunked")));
}

#[tokio::test]
async fn test_build_save_load_query() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("data");

    let kb = build_fixture_kb().await;
    assert_eq!(kb.get(Category::Classes).len(), 2);
    assert_eq!(kb.get(Category::Methods).len(), 3);

    save_kb(&dir, &kb);
    assert!(store::exists(&dir));

    let loaded = store::load(&dir).unwrap();
    assert_eq!(loaded, kb);

    let manifest = store::load_manifest(&dir).unwrap().unwrap();
    assert_eq!(manifest.rows["Methods"], 3);

    let service = service_over(loaded);
    let envelope = service.query_with_k("move the actor", Some(1), None).await;
    assert!(envelope.success, "{:?}", envelope.error);
    assert_eq!(envelope.data.as_deref(), Some(MOVE_ACTOR_BLOCK));
}

#[tokio::test]
async fn test_repeated_query_hits_cache() {
    let service = service_over(build_fixture_kb().await);

    let first = service.query("move the actor").await;
    let second = service.query("move the actor").await;
    assert_eq!(first, second);

    let (embedding, query) = service.cache_stats();
    assert_eq!(query.hits, 1);
    assert_eq!(query.misses, 1);
    assert_eq!(embedding.misses, 1);
}

#[tokio::test]
async fn test_empty_prompt_is_an_envelope_error() {
    let service = service_over(build_fixture_kb().await);
    let envelope = service.query("   ").await;
    assert!(!envelope.success);
    assert!(envelope.data.is_none());
    assert!(envelope.error.unwrap().contains("query must not be empty"));
}

#[tokio::test]
async fn test_unembeddable_chunk_is_skipped_and_rows_stay_aligned() {
    let doc = format!(
        "{}\n### Method Actor.broken()\nThis text is unembeddable.\n",
        API_DOC.split("## Functions").next().unwrap()
    );
    let corpus = chunk_markdown(&doc, BoundaryMode::Strict).unwrap();
    assert_eq!(corpus.methods.len(), 4);

    let embedder = KeywordEmbedder::default();
    let (kb, report) = build_knowledge_base(
        &embedder,
        &CharEstimateCounter,
        &corpus,
        BatchPolicy::default(),
        &NoProgress,
    )
    .await
    .unwrap();

    assert_eq!(report.methods.chunks, 4);
    assert_eq!(report.methods.indexed, 3);
    assert_eq!(report.methods.skipped, 1);

    let methods = kb.get(Category::Methods);
    assert_eq!(methods.len(), 3);
    for (row, text) in methods.texts().iter().enumerate() {
        assert!(!text.contains("unembeddable"));
        assert_eq!(
            methods.vector(row).unwrap(),
            KeywordEmbedder::vector_for(text).as_slice()
        );
    }
}

#[tokio::test]
async fn test_build_fails_when_nothing_embeds() {
    let corpus = chunk_markdown(
        "## Class Broken\nunembeddable\n### Method Broken.run()\nunembeddable too\n",
        BoundaryMode::Strict,
    )
    .unwrap();

    let err = build_knowledge_base(
        &KeywordEmbedder::default(),
        &CharEstimateCounter,
        &corpus,
        BatchPolicy::default(),
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("could be embedded"));
}

#[tokio::test]
async fn test_empty_corpus_builds_empty_kb() {
    let (kb, report) = build_knowledge_base(
        &KeywordEmbedder::default(),
        &CharEstimateCounter,
        &Corpus::default(),
        BatchPolicy::default(),
        &NoProgress,
    )
    .await
    .unwrap();
    assert!(kb.get(Category::Classes).is_empty());
    assert_eq!(report.methods.chunks, 0);

    let envelope = service_over(kb).query("move the actor").await;
    assert!(envelope.success);
    assert_eq!(
        envelope.data.as_deref(),
        Some("## Class Results:\n\n## Method Results:\n")
    );
}

struct Recorder(Mutex<Vec<BuildProgressEvent>>);

impl BuildProgressReporter for Recorder {
    fn report(&self, event: BuildProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn test_progress_reports_every_batch() {
    let corpus = chunk_markdown(API_DOC, BoundaryMode::Strict).unwrap();
    let recorder = Recorder(Mutex::new(Vec::new()));
    let policy = BatchPolicy {
        batch_size: 2,
        ..BatchPolicy::default()
    };

    build_knowledge_base(
        &KeywordEmbedder::default(),
        &CharEstimateCounter,
        &corpus,
        policy,
        &recorder,
    )
    .await
    .unwrap();

    let events = recorder.0.into_inner().unwrap();
    let last_methods = events
        .iter()
        .filter_map(|e| match e {
            BuildProgressEvent::Embedding {
                category: Category::Methods,
                n,
                total,
            } => Some((*n, *total)),
            _ => None,
        })
        .last();
    assert_eq!(last_methods, Some((3, 3)));
}

#[tokio::test]
async fn test_python_module_converts_and_indexes() {
    let tmp = TempDir::new().unwrap();
    let py = tmp.path().join("api.py");
    let md = tmp.path().join("out").join("api.md");
    std::fs::write(&py, PYTHON_MODULE).unwrap();

    let written = convert_source_to_markdown(&py, &md).unwrap();
    assert_eq!(written, 4);

    let rendered = std::fs::read_to_string(&md).unwrap();
    assert!(rendered.starts_with("# API Documentation"));
    assert!(rendered.contains("## Functions"));

    let from_markdown = load_corpus(&md, None, BoundaryMode::Strict).unwrap();
    assert_eq!(from_markdown.classes.len(), 1);
    assert_eq!(from_markdown.methods.len(), 2);

    let from_source = load_corpus(&py, Some(SourceFormat::Python), BoundaryMode::Lenient).unwrap();
    assert_eq!(from_source.methods.len(), 3);

    let (kb, report) = build_knowledge_base(
        &KeywordEmbedder::default(),
        &CharEstimateCounter,
        &from_source,
        BatchPolicy::default(),
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(report.methods.indexed, 3);

    let envelope = service_over(kb).query("destroy the actor").await;
    let data = envelope.data.unwrap();
    assert!(data.contains("## Class `Actor`"));
    assert!(data.contains("### Method `Actor.destroy()`"));
}
