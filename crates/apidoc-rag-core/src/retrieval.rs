//! Recall → rerank → filter retrieval pipeline.
//!
//! # Stages
//!
//! 1. **Recall**: the query is embedded once and searched against both
//!    category indexes independently (`class_top_k` classes and
//!    `method_top_k` methods).
//! 2. **Rerank**: classes keep their recall order. Methods are sorted by
//!    descending cosine similarity to the anchor, which is the mean
//!    embedding of the recalled classes. The sort is stable, so equal
//!    scores keep recall order. Without any recalled class there is no
//!    anchor and methods keep recall order.
//! 3. **Filter**: a class survives only if it starts with `"## "` and is
//!    shorter than `class_max_chars`; a method only if it starts with
//!    `"### "` and is shorter than `method_max_chars`. The survivors are
//!    then capped at `max_classes` / `max_methods`.
//!
//! Embeddings used for reranking are the stored index rows, so reranking
//! never calls the embedding capability.
//!
//! [`Retriever`] wraps the pipeline with two bounded LRU caches: one for
//! query embeddings and one for whole results.

use serde::Deserialize;
use std::sync::Arc;

use crate::cache::{CacheCapacity, CacheStats, CachedEmbedder, LruMemo};
use crate::embedding::{cosine_similarity, mean_vector, Embedder};
use crate::error::RagError;
use crate::index::{Hit, KnowledgeBase};
use crate::models::{Category, RetrievalResult};

const CLASS_PREFIX: &str = "## ";
const METHOD_PREFIX: &str = "### ";

/// Recall sizes, output caps, and length ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetrievalParams {
    #[serde(default = "default_class_top_k")]
    pub class_top_k: usize,
    #[serde(default = "default_method_top_k")]
    pub method_top_k: usize,
    #[serde(default = "default_max_classes")]
    pub max_classes: usize,
    #[serde(default = "default_max_methods")]
    pub max_methods: usize,
    #[serde(default = "default_class_max_chars")]
    pub class_max_chars: usize,
    #[serde(default = "default_method_max_chars")]
    pub method_max_chars: usize,
}

fn default_class_top_k() -> usize {
    3
}

fn default_method_top_k() -> usize {
    10
}

fn default_max_classes() -> usize {
    2
}

fn default_max_methods() -> usize {
    10
}

fn default_class_max_chars() -> usize {
    400
}

fn default_method_max_chars() -> usize {
    200
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            class_top_k: default_class_top_k(),
            method_top_k: default_method_top_k(),
            max_classes: default_max_classes(),
            max_methods: default_max_methods(),
            class_max_chars: default_class_max_chars(),
            method_max_chars: default_method_max_chars(),
        }
    }
}

/// Stage 1 output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recall {
    pub classes: Vec<Hit>,
    pub methods: Vec<Hit>,
}

/// Search both indexes with the same query vector.
pub fn recall(
    kb: &KnowledgeBase,
    query: &[f32],
    class_top_k: usize,
    method_top_k: usize,
) -> Result<Recall, RagError> {
    Ok(Recall {
        classes: kb.get(Category::Classes).search(query, class_top_k)?,
        methods: kb.get(Category::Methods).search(query, method_top_k)?,
    })
}

/// Reorder `candidates` by descending cosine similarity between each
/// candidate's vector and the mean of `anchors`.
///
/// Stable: equal similarities keep input order. With no anchors the input
/// order is returned unchanged.
pub fn rerank_by_anchor<T>(anchors: &[&[f32]], candidates: Vec<(T, &[f32])>) -> Vec<T> {
    let anchor = match mean_vector(anchors) {
        Some(a) => a,
        None => return candidates.into_iter().map(|(item, _)| item).collect(),
    };

    let mut scored: Vec<(T, f32)> = candidates
        .into_iter()
        .map(|(item, v)| {
            let sim = cosine_similarity(&anchor, v);
            (item, sim)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.into_iter().map(|(item, _)| item).collect()
}

/// Stage 2: rerank recalled methods against the recalled classes.
pub fn rerank_methods(kb: &KnowledgeBase, recall: Recall) -> (Vec<Hit>, Vec<Hit>) {
    let class_index = kb.get(Category::Classes);
    let method_index = kb.get(Category::Methods);

    let anchors: Vec<&[f32]> = recall
        .classes
        .iter()
        .filter_map(|hit| class_index.vector(hit.row))
        .collect();

    let candidates: Vec<(Hit, &[f32])> = recall
        .methods
        .into_iter()
        .filter_map(|hit| method_index.vector(hit.row).map(|v| (hit, v)))
        .collect();

    (recall.classes, rerank_by_anchor(&anchors, candidates))
}

/// Counts of chunks dropped by the gates, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub classes_malformed: usize,
    pub classes_too_long: usize,
    pub methods_malformed: usize,
    pub methods_too_long: usize,
}

/// Stage 3: format and length gates, then output caps.
pub fn filter(
    classes: Vec<String>,
    methods: Vec<String>,
    params: &RetrievalParams,
) -> (RetrievalResult, FilterStats) {
    let mut stats = FilterStats::default();

    let classes = gate(
        classes,
        CLASS_PREFIX,
        params.class_max_chars,
        &mut stats.classes_malformed,
        &mut stats.classes_too_long,
    )
    .take(params.max_classes)
    .collect();

    let methods = gate(
        methods,
        METHOD_PREFIX,
        params.method_max_chars,
        &mut stats.methods_malformed,
        &mut stats.methods_too_long,
    )
    .take(params.max_methods)
    .collect();

    (RetrievalResult { classes, methods }, stats)
}

fn gate<'a>(
    texts: Vec<String>,
    prefix: &'a str,
    max_chars: usize,
    malformed: &'a mut usize,
    too_long: &'a mut usize,
) -> impl Iterator<Item = String> + 'a {
    texts.into_iter().filter(move |text| {
        if !text.starts_with(prefix) {
            *malformed += 1;
            false
        } else if text.chars().count() >= max_chars {
            *too_long += 1;
            false
        } else {
            true
        }
    })
}

type QueryKey = (String, usize, usize);

/// Cached retrieval over one knowledge base.
///
/// Results are keyed by the exact query text plus the two recall sizes.
/// The knowledge base is immutable, so a cached result stays valid for the
/// lifetime of the retriever.
pub struct Retriever {
    kb: Arc<KnowledgeBase>,
    embedder: CachedEmbedder,
    params: RetrievalParams,
    results: LruMemo<QueryKey, RetrievalResult>,
}

impl Retriever {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        embedder: Arc<dyn Embedder>,
        params: RetrievalParams,
        capacity: CacheCapacity,
    ) -> Self {
        Self {
            kb,
            embedder: CachedEmbedder::new(embedder, capacity.embedding_capacity),
            params,
            results: LruMemo::new(capacity.query_capacity),
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// `(embedding cache, query cache)` statistics.
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.embedder.stats(), self.results.stats())
    }

    /// Retrieve with the configured recall sizes.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult, RagError> {
        self.retrieve_with_k(query, self.params.class_top_k, self.params.method_top_k)
            .await
    }

    /// Retrieve with explicit recall sizes. Output caps still apply.
    ///
    /// Fails with [`RagError::Retrieval`] on an empty query or when the
    /// query cannot be embedded. Failures are not cached.
    pub async fn retrieve_with_k(
        &self,
        query: &str,
        class_top_k: usize,
        method_top_k: usize,
    ) -> Result<RetrievalResult, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::Retrieval("query must not be empty".into()));
        }

        let key = (query.to_string(), class_top_k, method_top_k);
        if let Some(hit) = self.results.get(&key) {
            tracing::debug!(query, "query cache hit");
            return Ok(hit);
        }

        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RagError::Retrieval(format!("query embedding failed: {}", e)))?;

        let recalled = recall(&self.kb, &vector, class_top_k, method_top_k)?;
        tracing::debug!(
            classes = recalled.classes.len(),
            methods = recalled.methods.len(),
            "recall"
        );

        let (classes, methods) = rerank_methods(&self.kb, recalled);
        let (result, stats) = filter(
            classes.into_iter().map(|h| h.text).collect(),
            methods.into_iter().map(|h| h.text).collect(),
            &self.params,
        );
        if stats != FilterStats::default() {
            tracing::debug!(?stats, "filter dropped chunks");
        }

        self.results.put(key, result.clone());
        Ok(result)
    }
}
