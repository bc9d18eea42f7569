//! Error taxonomy for the ingestion and answering pipeline.
//!
//! Ingestion errors (`Extraction`, `EmptyDocument`, `NoChunks`,
//! `CardinalityMismatch`, `Provider`) are fatal and abort the ingest with a
//! metadata rollback. `Generation` is caught inside the answer composer and
//! downgraded to a fixed safe fallback — it never reaches a caller raw.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Source bytes were unreadable or of an unsupported document type.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Extraction succeeded but yielded no usable text.
    #[error("document contains no extractable text")]
    EmptyDocument,

    /// Chunking produced zero retrieval units.
    #[error("no chunks generated from document")]
    NoChunks,

    /// An embedding batch returned a different number of vectors than
    /// texts requested.
    #[error("embedding cardinality mismatch: got {got} vectors for {expected} texts")]
    CardinalityMismatch { got: usize, expected: usize },

    /// The embedding or vector-store capability misbehaved (unavailable,
    /// empty batch, non-retryable API error).
    #[error("provider error: {0}")]
    Provider(String),

    /// A referenced policy or log row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The generation capability failed or returned nothing usable.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
