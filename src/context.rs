//! Process-wide state, constructed once and passed to every handler.

use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwapOption;
use tracing::info;

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generation::GenerationEngine;
use crate::ingest::IngestionPipeline;
use crate::memory::VectorMemory;
use crate::orchestrator::StreamingOrchestrator;
use crate::retriever::Retriever;
use crate::session::ConnectionManager;

pub struct AppContext {
    pub config: Config,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub memory: Arc<VectorMemory>,
    pub engine: Arc<GenerationEngine>,
    pub connections: ConnectionManager,
    current_document: ArcSwapOption<String>,
}

impl AppContext {
    /// Builds providers from `config` and an empty memory sized for the
    /// embedder.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let engine = GenerationEngine::from_config(&config)?;
        info!(
            embedding = embedder.model_name(),
            dims = embedder.dims(),
            generator = engine.generator_name(),
            k = config.retrieval.k,
            "providers ready"
        );
        Ok(Self::new(config, embedder, Arc::new(engine)))
    }

    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        engine: Arc<GenerationEngine>,
    ) -> Self {
        let memory = Arc::new(VectorMemory::new(config.retrieval.k, embedder.dims()));
        Self {
            config,
            embedder,
            memory,
            engine,
            connections: ConnectionManager::new(),
            current_document: ArcSwapOption::empty(),
        }
    }

    pub fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.memory),
            &self.config,
        )
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(Arc::clone(&self.embedder), Arc::clone(&self.memory))
    }

    pub fn orchestrator(&self) -> StreamingOrchestrator {
        StreamingOrchestrator::new(
            self.retriever(),
            Arc::clone(&self.engine),
            self.config.generation.system_prompt.clone(),
        )
    }

    /// Identifier of the most recently ingested document.
    pub fn current_document(&self) -> Option<String> {
        self.current_document.load_full().map(|id| id.as_ref().clone())
    }

    pub fn set_current_document(&self, identifier: &str) {
        self.current_document
            .store(Some(Arc::new(identifier.to_string())));
    }

    /// Drops all process state: stored chunks, the current-document marker
    /// and connection registrations.
    pub fn shutdown(&self) {
        let chunks = self.memory.len();
        self.memory.clear();
        self.current_document.store(None);
        self.connections.clear();
        info!(chunks, "process state cleared");
    }
}
