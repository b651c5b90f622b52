//! Query entry point shared by the CLI and the HTTP tool server.
//!
//! [`QueryService`] owns the loaded knowledge base and the cached
//! [`Retriever`]. Loading fails hard on an inconsistent index pair, so a
//! service that exists is always serving aligned rows. Individual query
//! failures never escape as errors; they come back as a [`QueryEnvelope`]
//! with `success = false`.

use anyhow::{Context, Result};
use apidoc_rag_core::cache::{CacheCapacity, CacheStats};
use apidoc_rag_core::embedding::Embedder;
use apidoc_rag_core::index::KnowledgeBase;
use apidoc_rag_core::retrieval::{RetrievalParams, Retriever};
use apidoc_rag_core::{Category, RagError, RetrievalResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding;
use crate::store;

/// Result of one query: either `data` (the formatted snippet block) or
/// `error`, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryEnvelope {
    pub fn ok(data: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<RetrievalResult, RagError>> for QueryEnvelope {
    fn from(result: Result<RetrievalResult, RagError>) -> Self {
        match result {
            Ok(r) => QueryEnvelope::ok(r.to_prompt_block()),
            Err(e) => QueryEnvelope::err(e.to_string()),
        }
    }
}

pub struct QueryService {
    retriever: Retriever,
}

impl QueryService {
    /// Load the knowledge base named by the config and set up the provider.
    pub fn load(config: &Config) -> Result<Self> {
        let kb = store::load(&config.index.dir).with_context(|| {
            format!(
                "Failed to load knowledge base from {}",
                config.index.dir.display()
            )
        })?;
        let provider = embedding::create_provider(&config.embedding)?;

        tracing::info!(
            classes = kb.get(Category::Classes).len(),
            methods = kb.get(Category::Methods).len(),
            model = provider.model_name(),
            "knowledge base loaded"
        );

        Ok(Self::from_parts(
            kb,
            provider,
            config.retrieval,
            config.cache,
        ))
    }

    pub fn from_parts(
        kb: KnowledgeBase,
        embedder: Arc<dyn Embedder>,
        params: RetrievalParams,
        capacity: CacheCapacity,
    ) -> Self {
        Self {
            retriever: Retriever::new(Arc::new(kb), embedder, params, capacity),
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Run the pipeline and return the raw result.
    pub async fn retrieve(&self, prompt: &str) -> Result<RetrievalResult, RagError> {
        self.retriever.retrieve(prompt).await
    }

    /// Run the pipeline and wrap the outcome in an envelope.
    pub async fn query(&self, prompt: &str) -> QueryEnvelope {
        self.query_with_k(prompt, None, None).await
    }

    /// [`QueryService::query`] with recall sizes overriding the configured
    /// ones.
    pub async fn query_with_k(
        &self,
        prompt: &str,
        class_top_k: Option<usize>,
        method_top_k: Option<usize>,
    ) -> QueryEnvelope {
        let params = self.retriever.params();
        let result = self
            .retriever
            .retrieve_with_k(
                prompt,
                class_top_k.unwrap_or(params.class_top_k),
                method_top_k.unwrap_or(params.method_top_k),
            )
            .await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "query failed");
        }
        result.into()
    }

    pub fn row_counts(&self) -> (usize, usize) {
        let kb = self.retriever.knowledge_base();
        (
            kb.get(Category::Classes).len(),
            kb.get(Category::Methods).len(),
        )
    }

    /// `(embedding cache, query cache)` statistics.
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        self.retriever.cache_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apidoc_rag_core::index::{CategoryIndex, FlatL2Index};
    use apidoc_rag_core::EmbedError;
    use async_trait::async_trait;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            if texts.iter().any(|t| t == "offline") {
                return Err(EmbedError::Request("connection refused".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn service() -> QueryService {
        let classes = CategoryIndex::new(
            Category::Classes,
            FlatL2Index::build(&[vec![1.0, 0.0]]).unwrap(),
            vec!["## Class Actor\nBase class.".into()],
        )
        .unwrap();
        let methods = CategoryIndex::new(
            Category::Methods,
            FlatL2Index::build(&[vec![0.9, 0.1]]).unwrap(),
            vec!["### Method Actor.destroy()".into()],
        )
        .unwrap();
        QueryService::from_parts(
            KnowledgeBase::new(classes, methods),
            Arc::new(FixedEmbedder),
            RetrievalParams::default(),
            CacheCapacity::default(),
        )
    }

    #[tokio::test]
    async fn test_success_envelope_carries_prompt_block() {
        let envelope = service().query("remove an actor").await;
        assert!(envelope.success);
        assert_eq!(
            envelope.data.as_deref(),
            Some("## Class Results:\n## Class Actor\nBase class.\n\n## Method Results:\n### Method Actor.destroy()\n")
        );
        assert!(envelope.error.is_none());
    }

    #[tokio::test]
    async fn test_failure_envelope_has_no_data() {
        let envelope = service().query("offline").await;
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert!(envelope.error.unwrap().contains("connection refused"));

        let json = serde_json::to_value(service().query("").await).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
    }
}
