//! Client handles shared by every request handler.

use anyhow::Result;

use crate::config::ServiceSettings;
use crate::judge::Judge;
use crate::ollama::{ModelHandle, OllamaClient};
use crate::readiness::Readiness;
use crate::splitter::ChunkingConfig;
use crate::tracking::MlflowTracker;
use crate::vector_store::{ChromaStore, CollectionName};

/// Handles to the backing services plus request-shaping settings.
///
/// Built once at startup; every field is read-only afterwards.
#[derive(Clone)]
pub struct AppState {
    /// Raw Ollama handle, used for liveness checks and model pulls.
    pub ollama: OllamaClient,
    /// Embedding model.
    pub embedder: ModelHandle,
    /// Answer generation model.
    pub generator: ModelHandle,
    /// Judge bound to its own model.
    pub judge: Judge,
    /// Chunk store.
    pub store: ChromaStore,
    /// Run recorder.
    pub tracker: MlflowTracker,
    /// Ingestion windowing.
    pub chunking: ChunkingConfig,
    /// Max inputs per embedding request.
    pub embed_batch_size: usize,
    /// Default retrieval depth.
    pub default_top_k: usize,
    /// Maximum retrieval depth.
    pub max_top_k: usize,
    /// Startup gate.
    pub readiness: Readiness,
}

impl AppState {
    /// Builds every client from validated settings. The readiness gate starts closed.
    pub fn from_settings(settings: &ServiceSettings) -> Result<Self> {
        let ollama = OllamaClient::new(&settings.ollama_base_url, settings.request_timeout)?;
        let store = ChromaStore::new(
            &settings.chroma_base_url,
            CollectionName::new(settings.collection.clone())?,
            settings.request_timeout,
        )?;
        let tracker = MlflowTracker::new(
            &settings.mlflow_tracking_uri,
            settings.experiment.clone(),
            settings.request_timeout,
        )?;
        Ok(Self {
            embedder: ollama.model(settings.models.embedding.clone()),
            generator: ollama.model(settings.models.generation.clone()),
            judge: Judge::new(ollama.model(settings.models.judge.clone())),
            ollama,
            store,
            tracker,
            chunking: settings.chunking,
            embed_batch_size: settings.embed_batch_size.max(1),
            default_top_k: settings.default_top_k,
            max_top_k: settings.max_top_k,
            readiness: Readiness::new(),
        })
    }
}
