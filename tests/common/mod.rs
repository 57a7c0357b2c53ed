//! Offline providers and context builders shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use lectio::config::Config;
use lectio::context::AppContext;
use lectio::embedding::{EmbeddingProvider, HashingProvider};
use lectio::error::GenerationError;
use lectio::generation::{
    AudioStream, ExtractiveGenerator, GenerationEngine, SpeechSynthesizer,
};

pub const DIMS: usize = 64;

/// Returns `[sentence]` as the audio bytes for each sentence.
pub struct BracketSpeech;

#[async_trait]
impl SpeechSynthesizer for BracketSpeech {
    fn media_type(&self) -> &str {
        "audio/x-test"
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream, GenerationError> {
        let bytes = Bytes::from(format!("[{}]", text));
        Ok(Box::pin(stream::iter(vec![Ok(bytes)])))
    }
}

pub fn offline_config(root: &Path) -> Config {
    let mut config = Config::minimal();
    config.server.upload_dir = root.join("books");
    config.embedding.provider = "hashing".to_string();
    config.embedding.dims = Some(DIMS);
    config.retrieval.k = 1;
    config.chunking.max_tokens = 64;
    config.chunking.overlap_tokens = 0;
    config
}

/// Hashing embeddings, extractive answers, bracket "audio".
pub fn offline_context(root: &Path) -> Arc<AppContext> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingProvider::new(DIMS));
    let engine = GenerationEngine::new(
        Arc::new(ExtractiveGenerator::new()),
        Arc::new(BracketSpeech),
        Duration::from_secs(5),
    );
    Arc::new(AppContext::new(
        offline_config(root),
        embedder,
        Arc::new(engine),
    ))
}
