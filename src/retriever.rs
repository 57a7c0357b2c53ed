//! Query-time read path: embed the question, search the memory.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::memory::VectorMemory;
use crate::models::ScoredChunk;

/// Ranked passages retrieved for one query.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub passages: Vec<ScoredChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Passage texts in ranked order, separated by blank lines.
    pub fn text(&self) -> String {
        self.passages
            .iter()
            .map(|p| p.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    memory: Arc<VectorMemory>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, memory: Arc<VectorMemory>) -> Self {
        Self { embedder, memory }
    }

    /// Returns up to `k` passages closest to `query`.
    ///
    /// With nothing ingested the provider is not called and the context is
    /// empty, so queries still work when embeddings are disabled.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievedContext, EmbeddingError> {
        if self.memory.is_empty() {
            debug!("memory is empty, skipping retrieval");
            return Ok(RetrievedContext::default());
        }

        let vector = self.embedder.embed_query(query).await?;
        let passages = self.memory.search(&vector, self.memory.k());
        debug!(passages = passages.len(), "retrieved context");
        Ok(RetrievedContext { passages })
    }
}
