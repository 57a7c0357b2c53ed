//! In-memory vector store with brute-force cosine search.
//!
//! The whole chunk set lives in one immutable snapshot behind an
//! [`ArcSwap`]. Readers load the current snapshot without locking; an
//! upsert builds the next snapshot (old entries minus the replaced
//! document, plus the new chunks) and swaps it in, so a concurrent search
//! sees either the complete old document or the complete new one.
//!
//! Nothing here is persisted. Dropping the process drops the memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::embedding::cosine_similarity;
use crate::error::EmbeddingError;
use crate::models::{Chunk, DocumentSummary, ScoredChunk};

struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
    /// Global insertion sequence; breaks distance ties.
    seq: u64,
}

type Snapshot = Vec<Arc<Entry>>;

pub struct VectorMemory {
    k: usize,
    dims: usize,
    entries: ArcSwap<Snapshot>,
    next_seq: AtomicU64,
}

impl VectorMemory {
    /// Creates an empty memory. `k` bounds every search and is at least 1.
    pub fn new(k: usize, dims: usize) -> Self {
        Self {
            k: k.max(1),
            dims,
            entries: ArcSwap::from_pointee(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Replaces every chunk stored under `identifier` with `chunks`.
    ///
    /// All vectors are checked before anything is swapped in; on error the
    /// memory is left untouched. Returns the number of chunks now stored
    /// for `identifier`.
    pub fn upsert(
        &self,
        identifier: &str,
        chunks: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<usize, EmbeddingError> {
        if let Some((_, bad)) = chunks.iter().find(|(_, v)| v.len() != self.dims) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }

        let count = chunks.len();
        let base = self.next_seq.fetch_add(count as u64, Ordering::Relaxed);
        let fresh: Vec<Arc<Entry>> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, (mut chunk, vector))| {
                chunk.document_id = identifier.to_string();
                Arc::new(Entry {
                    chunk,
                    vector,
                    seq: base + i as u64,
                })
            })
            .collect();

        self.entries.rcu(|current| {
            let mut next: Snapshot = current
                .iter()
                .filter(|e| e.chunk.document_id != identifier)
                .cloned()
                .collect();
            next.extend(fresh.iter().cloned());
            next
        });

        Ok(count)
    }

    /// Returns at most `min(k, self.k())` chunks nearest to `query`,
    /// ordered by ascending cosine distance, ties by insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the memory is non-empty and `query` does not have
    /// [`dims`](Self::dims) components: query and stored vectors must come
    /// from the same provider.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let snapshot = self.entries.load();
        if snapshot.is_empty() {
            return Vec::new();
        }
        assert_eq!(
            query.len(),
            self.dims,
            "query vector has {} dimensions but memory holds {}",
            query.len(),
            self.dims
        );

        let mut scored: Vec<(f32, u64, &Entry)> = snapshot
            .iter()
            .map(|e| (1.0 - cosine_similarity(query, &e.vector), e.seq, &**e))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        scored
            .into_iter()
            .take(k.min(self.k))
            .map(|(distance, _, e)| ScoredChunk {
                chunk: e.chunk.clone(),
                distance,
            })
            .collect()
    }

    /// Stored documents in the order they were first inserted.
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let snapshot = self.entries.load();
        let mut order: Vec<(u64, String)> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for e in snapshot.iter() {
            let id = e.chunk.document_id.as_str();
            let count = counts.entry(id).or_insert(0);
            if *count == 0 {
                order.push((e.seq, id.to_string()));
            }
            *count += 1;
        }
        order.sort();
        order
            .into_iter()
            .map(|(_, identifier)| DocumentSummary {
                chunk_count: counts.get(identifier.as_str()).copied().unwrap_or(0),
                identifier,
            })
            .collect()
    }

    /// Drops every stored chunk.
    pub fn clear(&self) {
        self.entries.store(Arc::new(Vec::new()));
    }
}
