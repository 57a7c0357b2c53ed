//! Error taxonomy for the ingestion and streaming pipeline.
//!
//! Each stage owns a typed error so that callers can tell a bad upload
//! ([`LoadError`]) apart from a failing provider ([`EmbeddingError`],
//! [`GenerationError`]) or a misbehaving client ([`TransportError`]).
//! [`Error`] is the union returned by operations that span stages.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The document could not be read or turned into text.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("{path} is {size} bytes, above the {limit} byte limit")]
    TooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("document contains no extractable text: {0}")]
    Empty(PathBuf),
}

/// The embedding provider failed or returned vectors we cannot use.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding provider returned malformed output: {0}")]
    Malformed(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// The text or speech provider failed before or during a stream.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{0} provider is disabled")]
    Disabled(&'static str),

    #[error("generation provider unavailable: {0}")]
    Unavailable(String),

    #[error("generation provider error: {0}")]
    Provider(String),

    #[error("generation stream stalled for {0:?}")]
    Timeout(Duration),
}

/// The client sent a bad frame or could not be written to.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("failed to send frame: {0}")]
    Send(String),
}

/// Any failure of a pipeline operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
