//! Service settings sourced from command-line flags or the environment.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use url::Url;

use crate::splitter::ChunkingConfig;

/// Output format for service logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single-line records.
    Text,
    /// One JSON object per record.
    Json,
}

/// Names of the three models the service depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNames {
    /// Model that answers questions.
    pub generation: String,
    /// Model that scores answers.
    pub judge: String,
    /// Model that produces embeddings.
    pub embedding: String,
}

impl ModelNames {
    /// Models that must be present before requests are accepted, in pull order.
    pub fn required(&self) -> [&str; 3] {
        [&self.generation, &self.judge, &self.embedding]
    }
}

/// Command-line interface of the API server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ragscope-api",
    about = "Retrieval-augmented Q&A API with LLM-judge scoring and MLflow tracking"
)]
pub struct ServiceCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "RAGSCOPE_BIND", default_value = "0.0.0.0:8000")]
    pub bind: String,

    /// Base URL of the Ollama server used for embeddings and completions.
    #[arg(long, env = "OLLAMA_BASE_URL", default_value = "http://ollama:11434")]
    pub ollama_base_url: String,

    /// Model that generates answers.
    #[arg(long, env = "OLLAMA_MODEL", default_value = "llama3.2")]
    pub ollama_model: String,

    /// Model that scores answers.
    #[arg(long, env = "OLLAMA_JUDGE_MODEL", default_value = "mistral")]
    pub ollama_judge_model: String,

    /// Model that embeds chunks and questions.
    #[arg(long, env = "OLLAMA_EMBED_MODEL", default_value = "nomic-embed-text")]
    pub ollama_embed_model: String,

    /// ChromaDB host name.
    #[arg(long, env = "CHROMA_HOST", default_value = "chromadb")]
    pub chroma_host: String,

    /// ChromaDB port.
    #[arg(long, env = "CHROMA_PORT", default_value_t = 8000)]
    pub chroma_port: u16,

    /// Collection holding document chunks.
    #[arg(long, env = "CHROMA_COLLECTION", default_value = "documents")]
    pub chroma_collection: String,

    /// MLflow tracking server URI.
    #[arg(long, env = "MLFLOW_TRACKING_URI", default_value = "http://mlflow:5000")]
    pub mlflow_tracking_uri: String,

    /// Experiment that receives one run per query.
    #[arg(long, env = "MLFLOW_EXPERIMENT", default_value = "rag-evaluation")]
    pub mlflow_experiment: String,

    /// Characters per chunk window.
    #[arg(long, env = "RAGSCOPE_CHUNK_SIZE", default_value_t = 500)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunk windows.
    #[arg(long, env = "RAGSCOPE_CHUNK_OVERLAP", default_value_t = 50)]
    pub chunk_overlap: usize,

    /// Chunks retrieved when the client does not pass top_k.
    #[arg(long, env = "RAGSCOPE_DEFAULT_TOP_K", default_value_t = 4)]
    pub default_top_k: usize,

    /// Upper bound applied to client-supplied top_k.
    #[arg(long, env = "RAGSCOPE_MAX_TOP_K", default_value_t = 20)]
    pub max_top_k: usize,

    /// Max chunks sent per embedding request.
    #[arg(long, env = "RAGSCOPE_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Seconds before calls to Ollama, ChromaDB or MLflow time out.
    #[arg(long, env = "RAGSCOPE_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// Largest accepted upload, in bytes.
    #[arg(long, env = "RAGSCOPE_MAX_UPLOAD_BYTES", default_value_t = 32 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Validated settings derived from [`ServiceCli`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Socket the server listens on.
    pub bind: SocketAddr,
    /// Ollama base URL without a trailing slash.
    pub ollama_base_url: String,
    /// Generation, judge and embedding model names.
    pub models: ModelNames,
    /// ChromaDB base URL without a trailing slash.
    pub chroma_base_url: String,
    /// Chunk collection name.
    pub collection: String,
    /// MLflow base URL without a trailing slash.
    pub mlflow_tracking_uri: String,
    /// MLflow experiment name.
    pub experiment: String,
    /// Window length and overlap for ingestion.
    pub chunking: ChunkingConfig,
    /// Default retrieval depth.
    pub default_top_k: usize,
    /// Maximum retrieval depth.
    pub max_top_k: usize,
    /// Embedding batch size.
    pub embed_batch_size: usize,
    /// Per-request timeout for backing services.
    pub request_timeout: Duration,
    /// Upload size limit for `/ingest`.
    pub max_upload_bytes: usize,
}

impl ServiceCli {
    /// Converts the parsed CLI into validated [`ServiceSettings`].
    pub fn build_settings(&self) -> Result<ServiceSettings> {
        let bind: SocketAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {}", self.bind))?;
        let models = ModelNames {
            generation: required("OLLAMA_MODEL", &self.ollama_model)?,
            judge: required("OLLAMA_JUDGE_MODEL", &self.ollama_judge_model)?,
            embedding: required("OLLAMA_EMBED_MODEL", &self.ollama_embed_model)?,
        };
        let chroma_host = required("CHROMA_HOST", &self.chroma_host)?;
        let chunking = ChunkingConfig::new(self.chunk_size, self.chunk_overlap)?;
        let max_top_k = self.max_top_k.max(1);
        anyhow::ensure!(
            self.default_top_k >= 1 && self.default_top_k <= max_top_k,
            "default top_k {} must be between 1 and {}",
            self.default_top_k,
            max_top_k
        );

        Ok(ServiceSettings {
            bind,
            ollama_base_url: http_base_url("OLLAMA_BASE_URL", &self.ollama_base_url)?,
            models,
            chroma_base_url: http_base_url(
                "CHROMA_HOST",
                &format!("http://{}:{}", chroma_host, self.chroma_port),
            )?,
            collection: self.chroma_collection.clone(),
            mlflow_tracking_uri: http_base_url("MLFLOW_TRACKING_URI", &self.mlflow_tracking_uri)?,
            experiment: required("MLFLOW_EXPERIMENT", &self.mlflow_experiment)?,
            chunking,
            default_top_k: self.default_top_k,
            max_top_k,
            embed_batch_size: self.embed_batch_size.max(1),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_upload_bytes: self.max_upload_bytes.max(1),
        })
    }
}

fn required(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    anyhow::ensure!(!trimmed.is_empty(), "{name} must not be empty");
    Ok(trimmed.to_string())
}

fn http_base_url(name: &str, value: &str) -> Result<String> {
    let parsed = Url::parse(value.trim()).with_context(|| format!("{name} is not a URL: {value}"))?;
    anyhow::ensure!(
        matches!(parsed.scheme(), "http" | "https"),
        "{name} must be an http(s) URL, got {value}"
    );
    Ok(value.trim().trim_end_matches('/').to_string())
}
