//! # apidoc-rag core
//!
//! Runtime-agnostic logic for turning a reference-API document into a
//! searchable knowledge base and answering free-text lookups against it.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. Embedding
//! backends, persistence, and the CLI/HTTP front-ends live in the
//! `apidoc-rag` application crate.
//!
//! ```text
//! API document ──▶ chunk ──▶ Corpus ──▶ embed_batch ──▶ KnowledgeBase
//!                                                          │
//!            query ──▶ Retriever (recall → rerank → filter) ┘──▶ RetrievalResult
//! ```

pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod retrieval;

pub use error::{EmbedError, RagError};
pub use models::{Category, Chunk, ChunkKind, ChunkMetadata, Corpus, RetrievalResult};
