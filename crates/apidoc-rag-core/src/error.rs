//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Build-time failures ([`RagError::Parse`], per-chunk [`EmbedError`]s) are
//! recoverable: the caller skips the document or chunk and keeps going.
//! [`RagError::IndexDesync`] is fatal and must stop serving. Query-time
//! failures surface as [`RagError::Retrieval`] and are turned into a
//! structured envelope by the service layer.

use thiserror::Error;

use crate::models::Category;

/// A single failed call to an external embedding capability.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    /// The provider could not be reached or the request timed out.
    #[error("embedding request failed: {0}")]
    Request(String),
    /// The provider answered with a non-success status.
    #[error("embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The provider answered, but the payload was unusable.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    /// Embeddings are not configured.
    #[error("embedding provider is disabled")]
    Disabled,
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("index desync for {category}: {vectors} vectors but {texts} text rows")]
    IndexDesync {
        category: Category,
        vectors: usize,
        texts: usize,
    },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("retrieval failed: {0}")]
    Retrieval(String),
}

impl RagError {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}
