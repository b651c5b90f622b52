//! Fixtures shared by the integration suites.

#![allow(dead_code)]

use apidoc_rag::progress::NoProgress;
use apidoc_rag::store::{self, Manifest};
use apidoc_rag_core::chunk::{chunk_markdown, BoundaryMode};
use apidoc_rag_core::embedding::{BatchPolicy, CharEstimateCounter, Embedder};
use apidoc_rag_core::index::KnowledgeBase;
use apidoc_rag_core::{Category, EmbedError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const API_DOC: &str = "\
# API Reference

## Class Actor
Base class for every actor placed in a level.

### Method Actor.move(x, y)
Move the actor to a point.

### Method Actor.destroy()
Destroy the actor.

## Class Light
A light source.

### Method Light.set_intensity(value)
Change the light brightness.

## Functions

### Function spawn()
Never chunked from markdown.
";

pub const PYTHON_MODULE: &str = r#"
class Actor:
    """Base class for every actor placed in a level."""

    def move(self, x, y):
        """Move the actor to a point."""

    def destroy(self):
        """Destroy the actor."""


def spawn_light(level):
    """Add a light to the level."""
"#;

const KEYWORDS: [&str; 4] = ["actor", "move", "destroy", "light"];

/// Deterministic embedder: one dimension per keyword, valued by how often
/// the keyword occurs in the lowercased text. Texts containing
/// `unembeddable` fail the whole call.
#[derive(Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        KEYWORDS
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if texts.iter().any(|t| t.contains("unembeddable")) {
            return Err(EmbedError::Status {
                status: 400,
                body: "input rejected".into(),
            });
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

/// Chunk [`API_DOC`] in strict mode and build a knowledge base from it.
pub async fn build_fixture_kb() -> KnowledgeBase {
    let corpus = chunk_markdown(API_DOC, BoundaryMode::Strict).unwrap();
    let (kb, _) = apidoc_rag::build_cmd::build_knowledge_base(
        &KeywordEmbedder::default(),
        &CharEstimateCounter,
        &corpus,
        BatchPolicy::default(),
        &NoProgress,
    )
    .await
    .unwrap();
    kb
}

/// Persist `kb` into `dir` with a manifest naming the test model.
pub fn save_kb(dir: &Path, kb: &KnowledgeBase) {
    let mut rows = BTreeMap::new();
    for category in Category::ALL {
        rows.insert(category.as_str().to_string(), kb.get(category).len());
    }
    let manifest = Manifest {
        model: "keyword-test".into(),
        dims: 4,
        built_at: chrono::Utc::now().timestamp(),
        source: "api.md".into(),
        rows,
    };
    store::save(dir, kb, &manifest).unwrap();
}

/// The prompt block expected for "move the actor" with one recalled class.
pub const MOVE_ACTOR_BLOCK: &str = "## Class Results:\n\
## Class Actor\nBase class for every actor placed in a level.\n\
\n## Method Results:\n\
### Method Actor.move(x, y)\nMove the actor to a point.\n\
### Method Actor.destroy()\nDestroy the actor.\n\
### Method Light.set_intensity(value)\nChange the light brightness.\n";
