//! Exact L2 vector index and the per-category knowledge base.
//!
//! [`FlatL2Index`] stores embeddings row-major and answers top-k queries by
//! brute force, which is exact and fast enough for hundreds to low
//! thousands of rows. [`CategoryIndex`] pairs an index with the chunk
//! texts it was built from. Row `i` of the vectors and row `i` of the texts
//! always describe the same chunk; construction refuses anything else.
//!
//! Indexes are immutable. A changed corpus means building a new
//! [`KnowledgeBase`] from scratch.

use crate::embedding::{
    embed_batch_with_progress, squared_l2, BatchPolicy, BatchProgressFn, Embedder, TokenCounter,
};
use crate::error::RagError;
use crate::models::{Category, Corpus};

/// Row id reported for result slots that have no match.
pub const NO_MATCH: i64 = -1;

/// Raw top-k answer: `indices[i]` is a row or [`NO_MATCH`], and
/// `distances[i]` is its squared L2 distance (`f32::INFINITY` for
/// sentinels). Both always have length `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHits {
    pub indices: Vec<i64>,
    pub distances: Vec<f32>,
}

impl SearchHits {
    /// Valid `(row, distance)` pairs, sentinels dropped.
    pub fn valid(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices
            .iter()
            .zip(self.distances.iter())
            .filter(|(&i, _)| i >= 0)
            .map(|(&i, &d)| (i as usize, d))
    }
}

/// Brute-force squared-L2 index over fixed-dimension vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatL2Index {
    dims: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    /// Build from row vectors. All rows must share one dimensionality.
    pub fn build(vectors: &[Vec<f32>]) -> Result<Self, RagError> {
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(dims * vectors.len());
        for v in vectors {
            if v.len() != dims {
                return Err(RagError::DimensionMismatch {
                    expected: dims,
                    actual: v.len(),
                });
            }
            data.extend_from_slice(v);
        }
        Ok(Self { dims, data })
    }

    /// Rebuild from a flat row-major buffer, as read back from disk.
    pub fn from_flat(dims: usize, data: Vec<f32>) -> Result<Self, RagError> {
        if dims == 0 && !data.is_empty() || dims > 0 && data.len() % dims != 0 {
            return Err(RagError::DimensionMismatch {
                expected: dims,
                actual: data.len(),
            });
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// The stored embedding of `row`.
    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        if row >= self.len() {
            return None;
        }
        let start = row * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    /// Up to `k` nearest rows by ascending squared L2 distance. Equal
    /// distances keep the lower row first. Slots past the number of rows
    /// are filled with [`NO_MATCH`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<SearchHits, RagError> {
        if !self.is_empty() && query.len() != self.dims {
            return Err(RagError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .filter_map(|row| self.vector(row).map(|v| (row, squared_l2(query, v))))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        let mut hits = SearchHits {
            indices: Vec::with_capacity(k),
            distances: Vec::with_capacity(k),
        };
        for (row, dist) in scored {
            hits.indices.push(row as i64);
            hits.distances.push(dist);
        }
        while hits.indices.len() < k {
            hits.indices.push(NO_MATCH);
            hits.distances.push(f32::INFINITY);
        }
        Ok(hits)
    }
}

/// A resolved search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub row: usize,
    pub distance: f32,
    pub text: String,
}

/// Vector index plus the chunk texts it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryIndex {
    category: Category,
    index: FlatL2Index,
    texts: Vec<String>,
}

impl CategoryIndex {
    /// Pair an index with its texts. Fails with [`RagError::IndexDesync`]
    /// when the row counts differ.
    pub fn new(category: Category, index: FlatL2Index, texts: Vec<String>) -> Result<Self, RagError> {
        if index.len() != texts.len() {
            return Err(RagError::IndexDesync {
                category,
                vectors: index.len(),
                texts: texts.len(),
            });
        }
        Ok(Self {
            category,
            index,
            texts,
        })
    }

    pub fn empty(category: Category) -> Self {
        Self {
            category,
            index: FlatL2Index::default(),
            texts: Vec::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn index(&self) -> &FlatL2Index {
        &self.index
    }

    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn text(&self, row: usize) -> Option<&str> {
        self.texts.get(row).map(String::as_str)
    }

    pub fn vector(&self, row: usize) -> Option<&[f32]> {
        self.index.vector(row)
    }

    /// Top-k hits with texts attached and sentinels removed.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, RagError> {
        let raw = self.index.search(query, k)?;
        Ok(raw
            .valid()
            .filter_map(|(row, distance)| {
                self.text(row).map(|text| Hit {
                    row,
                    distance,
                    text: text.to_string(),
                })
            })
            .collect())
    }
}

/// Per-category build counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryReport {
    pub chunks: usize,
    pub indexed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub classes: CategoryReport,
    pub methods: CategoryReport,
}

impl BuildReport {
    pub fn get(&self, category: Category) -> CategoryReport {
        match category {
            Category::Classes => self.classes,
            Category::Methods => self.methods,
        }
    }
}

/// One [`CategoryIndex`] per [`Category`].
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBase {
    classes: CategoryIndex,
    methods: CategoryIndex,
}

impl KnowledgeBase {
    pub fn new(classes: CategoryIndex, methods: CategoryIndex) -> Self {
        Self { classes, methods }
    }

    pub fn empty() -> Self {
        Self::new(
            CategoryIndex::empty(Category::Classes),
            CategoryIndex::empty(Category::Methods),
        )
    }

    pub fn get(&self, category: Category) -> &CategoryIndex {
        match category {
            Category::Classes => &self.classes,
            Category::Methods => &self.methods,
        }
    }

    /// Embed both corpora and build fresh indexes.
    ///
    /// Chunks that cannot be embedded are left out of the index and counted
    /// in the report; the build itself only fails on inconsistent vector
    /// dimensions.
    pub async fn build(
        embedder: &dyn Embedder,
        counter: &dyn TokenCounter,
        corpus: &Corpus,
        policy: BatchPolicy,
    ) -> Result<(Self, BuildReport), RagError> {
        Self::build_with_progress(embedder, counter, corpus, policy, &mut |_, _, _| {}).await
    }

    /// [`KnowledgeBase::build`] with a callback after every batch:
    /// `(category, texts_done, texts_total)`.
    pub async fn build_with_progress(
        embedder: &dyn Embedder,
        counter: &dyn TokenCounter,
        corpus: &Corpus,
        policy: BatchPolicy,
        on_batch: &mut (dyn FnMut(Category, usize, usize) + Send),
    ) -> Result<(Self, BuildReport), RagError> {
        let mut report = BuildReport::default();
        let mut built = Vec::with_capacity(2);

        for category in Category::ALL {
            let texts = corpus.texts(category);
            let mut progress = |done: usize, total: usize| on_batch(category, done, total);
            let progress: &mut BatchProgressFn<'_> = &mut progress;
            let embedded =
                embed_batch_with_progress(embedder, counter, &texts, policy, progress).await;

            let stats = CategoryReport {
                chunks: texts.len(),
                indexed: embedded.len(),
                skipped: embedded.rejected.len(),
            };
            tracing::info!(
                %category,
                chunks = stats.chunks,
                indexed = stats.indexed,
                skipped = stats.skipped,
                "category embedded"
            );
            match category {
                Category::Classes => report.classes = stats,
                Category::Methods => report.methods = stats,
            }

            let index = FlatL2Index::build(&embedded.vectors)?;
            built.push(CategoryIndex::new(category, index, embedded.accepted_texts)?);
        }

        let methods = built.pop().unwrap_or_else(|| CategoryIndex::empty(Category::Methods));
        let classes = built.pop().unwrap_or_else(|| CategoryIndex::empty(Category::Classes));
        Ok((Self::new(classes, methods), report))
    }
}
