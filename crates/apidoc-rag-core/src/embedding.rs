//! Embedding capability trait, the two-tier batch policy, and vector
//! utilities.
//!
//! Concrete backends (OpenAI, Ollama) live in the `apidoc-rag` app crate.
//! This module only decides what to do with their answers.
//!
//! # Batch policy
//!
//! Texts are split into fixed-size batches and each batch is one external
//! call ([`try_batch`]). When a batch call fails, every member is retried on
//! its own ([`try_item`]): texts over the token ceiling are rejected without
//! a call, the rest get exactly one more attempt. A text is therefore sent
//! at most twice, and a bad chunk only costs itself.

use async_trait::async_trait;

use crate::error::EmbedError;

/// Rough characters-per-token ratio used when no tokenizer is available.
pub const CHARS_PER_TOKEN: usize = 4;

/// External capability that maps texts to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality. `0` means "whatever the model returns".
    fn dims(&self) -> usize;

    /// Embed several texts in one call. The result is aligned with `texts`.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            n => Err(EmbedError::InvalidResponse(format!(
                "expected 1 vector, got {}",
                n
            ))),
        }
    }
}

/// Counts tokens the way the embedding model will.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Character-based estimate: one token per [`CHARS_PER_TOKEN`] characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimateCounter;

impl TokenCounter for CharEstimateCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub batch_size: usize,
    pub max_tokens: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_tokens: 8192,
        }
    }
}

/// Result of submitting one batch as a single call.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    AllAccepted(Vec<Vec<f32>>),
    BatchFailed(EmbedError),
}

/// Result of submitting one text on its own after a batch failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Accepted(Vec<f32>),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Empty or whitespace-only text; never sent.
    Blank,
    /// Over the token ceiling; never sent individually.
    TooManyTokens { tokens: usize, max_tokens: usize },
    /// The individual call failed.
    Failed(EmbedError),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Blank => write!(f, "blank text"),
            RejectReason::TooManyTokens { tokens, max_tokens } => {
                write!(f, "{} tokens exceeds limit of {}", tokens, max_tokens)
            }
            RejectReason::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// A text that did not make it into the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Position in the input slice.
    pub index: usize,
    pub reason: RejectReason,
}

/// Output of [`embed_batch`]: `vectors[i]` belongs to `accepted_texts[i]`,
/// both in input-relative order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub accepted_texts: Vec<String>,
    pub rejected: Vec<Rejected>,
}

impl EmbeddedBatch {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// Progress after each batch: `(texts_done, texts_total)`.
pub type BatchProgressFn<'a> = dyn FnMut(usize, usize) + Send + 'a;

fn check_vector(embedder: &dyn Embedder, vector: &[f32]) -> Result<(), EmbedError> {
    let dims = embedder.dims();
    if vector.is_empty() || (dims > 0 && vector.len() != dims) {
        return Err(EmbedError::InvalidResponse(format!(
            "vector has {} dimensions, expected {}",
            vector.len(),
            dims
        )));
    }
    Ok(())
}

/// Submit `texts` as a single call.
pub async fn try_batch(embedder: &dyn Embedder, texts: &[String]) -> BatchOutcome {
    let vectors = match embedder.embed_texts(texts).await {
        Ok(v) => v,
        Err(e) => return BatchOutcome::BatchFailed(e),
    };

    if vectors.len() != texts.len() {
        return BatchOutcome::BatchFailed(EmbedError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    for v in &vectors {
        if let Err(e) = check_vector(embedder, v) {
            return BatchOutcome::BatchFailed(e);
        }
    }

    BatchOutcome::AllAccepted(vectors)
}

/// Submit one text on its own, after checking it against the token ceiling.
pub async fn try_item(
    embedder: &dyn Embedder,
    counter: &dyn TokenCounter,
    max_tokens: usize,
    text: &str,
) -> ItemOutcome {
    let tokens = counter.count_tokens(text);
    if tokens > max_tokens {
        return ItemOutcome::Rejected(RejectReason::TooManyTokens { tokens, max_tokens });
    }

    match embedder.embed(text).await {
        Ok(v) => match check_vector(embedder, &v) {
            Ok(()) => ItemOutcome::Accepted(v),
            Err(e) => ItemOutcome::Rejected(RejectReason::Failed(e)),
        },
        Err(e) => ItemOutcome::Rejected(RejectReason::Failed(e)),
    }
}

/// Embed every non-blank text, batch first and per item on batch failure.
pub async fn embed_batch(
    embedder: &dyn Embedder,
    counter: &dyn TokenCounter,
    texts: &[String],
    policy: BatchPolicy,
) -> EmbeddedBatch {
    embed_batch_with_progress(embedder, counter, texts, policy, &mut |_, _| {}).await
}

/// [`embed_batch`] with a callback after every batch.
pub async fn embed_batch_with_progress(
    embedder: &dyn Embedder,
    counter: &dyn TokenCounter,
    texts: &[String],
    policy: BatchPolicy,
    on_batch: &mut BatchProgressFn<'_>,
) -> EmbeddedBatch {
    let mut out = EmbeddedBatch::default();

    let mut pending: Vec<usize> = Vec::with_capacity(texts.len());
    for (i, text) in texts.iter().enumerate() {
        if text.trim().is_empty() {
            out.rejected.push(Rejected {
                index: i,
                reason: RejectReason::Blank,
            });
        } else {
            pending.push(i);
        }
    }

    let batch_size = policy.batch_size.max(1);
    let total = pending.len();
    let mut done = 0;

    for (batch_no, group) in pending.chunks(batch_size).enumerate() {
        let batch: Vec<String> = group.iter().map(|&i| texts[i].clone()).collect();

        match try_batch(embedder, &batch).await {
            BatchOutcome::AllAccepted(vectors) => {
                tracing::debug!(batch = batch_no, size = batch.len(), "batch embedded");
                for (vector, text) in vectors.into_iter().zip(batch) {
                    out.vectors.push(vector);
                    out.accepted_texts.push(text);
                }
            }
            BatchOutcome::BatchFailed(err) => {
                tracing::warn!(
                    batch = batch_no,
                    size = batch.len(),
                    error = %err,
                    "batch embedding failed, retrying items individually"
                );
                for (&index, text) in group.iter().zip(batch) {
                    match try_item(embedder, counter, policy.max_tokens, &text).await {
                        ItemOutcome::Accepted(vector) => {
                            out.vectors.push(vector);
                            out.accepted_texts.push(text);
                        }
                        ItemOutcome::Rejected(reason) => {
                            tracing::warn!(index, %reason, "skipping chunk");
                            out.rejected.push(Rejected { index, reason });
                        }
                    }
                }
            }
        }

        done += group.len();
        on_batch(done, total);
    }

    out.rejected.sort_by_key(|r| r.index);
    out
}

/// Squared Euclidean distance. Vectors must have equal length.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Cosine similarity `dot(a, b) / (‖a‖·‖b‖ + 1e-8)`.
///
/// The epsilon keeps near-zero vectors at a similarity of about zero
/// instead of dividing by zero. Returns `0.0` for empty or mismatched
/// inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    const EPS: f32 = 1e-8;

    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt() + EPS)
}

/// Component-wise mean of `vectors`. `None` when there is nothing to
/// average or the lengths disagree.
pub fn mean_vector(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dims = first.len();
    if vectors.iter().any(|v| v.len() != dims) {
        return None;
    }

    let mut mean = vec![0.0f32; dims];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in &mut mean {
        *m /= n;
    }
    Some(mean)
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use apidoc_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder for tests. Each text maps to a 4-d vector
    /// derived from its bytes. Any call that contains a text with `FAIL`
    /// in it errors; batch calls fail if any member has more than
    /// `batch_char_limit` characters.
    pub struct MockEmbedder {
        pub calls: AtomicUsize,
        pub batch_char_limit: usize,
    }

    impl MockEmbedder {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                batch_char_limit: usize::MAX,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn vector_for(text: &str) -> Vec<f32> {
            let mut v = [0.0f32; 4];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += b as f32 / 255.0;
            }
            v.to_vec()
        }
    }

    #[async_trait]
    impl Embedder for MockEmbedder {
        fn model_name(&self) -> &str {
            "mock"
        }

        fn dims(&self) -> usize {
            4
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.contains("FAIL")) {
                return Err(EmbedError::Request("mock failure".into()));
            }
            if texts.len() > 1 && texts.iter().any(|t| t.len() > self.batch_char_limit) {
                return Err(EmbedError::Status {
                    status: 400,
                    body: "batch too large".into(),
                });
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        }
    }

    /// One token per whitespace-separated word.
    pub struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }
}
