//! Core data models used throughout lectio.
//!
//! These types represent the documents, chunks, and ranked passages that
//! flow through the ingestion and retrieval pipeline.

use std::path::PathBuf;

use serde::Serialize;

/// A loaded source document, before chunking.
///
/// `id` is the filename-derived identifier from [`crate::hash::document_id`].
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_path: PathBuf,
    pub content_type: String,
    pub byte_count: u64,
    pub text: String,
}

/// A chunk of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from vector search, with its cosine distance to the query.
///
/// Lower `distance` is closer.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub identifier: String,
    pub filename: String,
    pub location: String,
    pub byte_count: u64,
    pub chunk_count: usize,
    pub ingested_at: String,
}

/// Per-document summary of what the vector memory holds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentSummary {
    pub identifier: String,
    pub chunk_count: usize,
}
