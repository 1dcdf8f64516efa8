//! ChromaDB-backed chunk store reached over its REST API.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embeddings::DocumentChunk;
use crate::ollama::LIVENESS_TIMEOUT;

/// Validated Chroma collection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionName(String);

impl CollectionName {
    /// Checks Chroma's naming rules: 3-63 characters from `[A-Za-z0-9._-]`,
    /// starting and ending with an alphanumeric character.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let len = name.chars().count();
        anyhow::ensure!(
            (3..=63).contains(&len),
            "collection name must be 3-63 characters, got {len}"
        );
        anyhow::ensure!(
            name.chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')),
            "collection name {name:?} contains characters outside [A-Za-z0-9._-]"
        );
        let edges_ok = name.chars().next().is_some_and(|ch| ch.is_ascii_alphanumeric())
            && name.chars().last().is_some_and(|ch| ch.is_ascii_alphanumeric());
        anyhow::ensure!(
            edges_ok,
            "collection name {name:?} must start and end with a letter or digit"
        );
        Ok(Self(name))
    }

    /// Raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Store identifier.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Distance reported by the store, when included.
    pub distance: Option<f64>,
    /// Source filename from the chunk metadata.
    pub source: Option<String>,
}

/// HTTP handle to one Chroma collection.
#[derive(Clone)]
pub struct ChromaStore {
    client: Client,
    base_url: String,
    collection: CollectionName,
}

impl ChromaStore {
    /// Builds a store handle; no request is made until first use.
    pub fn new(base_url: &str, collection: CollectionName, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Chroma endpoint must be an http(s) URL"
        );
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Chroma HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
        })
    }

    /// Collection this handle reads and writes.
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Liveness check.
    pub async fn heartbeat(&self) -> Result<()> {
        let endpoint = self.endpoint("/heartbeat");
        let resp = self
            .client
            .get(&endpoint)
            .timeout(LIVENESS_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("failed to reach Chroma at {endpoint}"))?;
        let _: Value = read_json(resp, "heartbeat").await?;
        Ok(())
    }

    /// Resolves the collection id, creating the collection when missing.
    async fn collection_id(&self) -> Result<String> {
        let endpoint = self.endpoint("/collections");
        let request = CreateCollectionRequest {
            name: self.collection.as_str(),
            get_or_create: true,
        };
        let resp = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach Chroma at {endpoint}"))?;
        let parsed: CollectionResponse = read_json(resp, "get-or-create collection").await?;
        Ok(parsed.id)
    }

    /// Confirms the store is reachable and the collection exists.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.collection_id().await.map(|_| ())
    }

    /// Number of chunks stored in the collection.
    pub async fn count(&self) -> Result<usize> {
        let id = self.collection_id().await?;
        let endpoint = self.endpoint(&format!("/collections/{id}/count"));
        let resp = self
            .client
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("failed to reach Chroma at {endpoint}"))?;
        read_json(resp, "count").await
    }

    /// Writes chunks (ids, vectors, texts, metadata) in one request.
    pub async fn add(&self, chunks: &[DocumentChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let id = self.collection_id().await?;
        let endpoint = self.endpoint(&format!("/collections/{id}/add"));
        let request = AddRequest {
            ids: chunks.iter().map(|c| c.id.as_str()).collect(),
            embeddings: chunks.iter().map(|c| c.embedding.as_slice()).collect(),
            documents: chunks.iter().map(|c| c.text.as_str()).collect(),
            metadatas: chunks.iter().map(DocumentChunk::metadata).collect(),
        };
        let resp = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach Chroma at {endpoint}"))?;
        let _: Value = read_json(resp, "add").await?;
        Ok(())
    }

    /// Returns up to `k` chunks nearest to `embedding`, in store order.
    pub async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let id = self.collection_id().await?;
        let endpoint = self.endpoint(&format!("/collections/{id}/query"));
        let request = QueryRequest {
            query_embeddings: [embedding],
            n_results: k,
            include: ["documents", "metadatas", "distances"],
        };
        let resp = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach Chroma at {endpoint}"))?;
        let parsed: QueryResponse = read_json(resp, "query").await?;
        parsed.into_chunks()
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(resp: reqwest::Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        anyhow::bail!("Chroma {what} request failed ({status}): {body}");
    }
    resp.json()
        .await
        .with_context(|| format!("failed to parse Chroma {what} response"))
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct AddRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<&'a [f32]>,
    documents: Vec<&'a str>,
    metadatas: Vec<Value>,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 3],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Value>>>>,
}

impl QueryResponse {
    fn into_chunks(self) -> Result<Vec<RetrievedChunk>> {
        // One query embedding was sent, so only the first row is meaningful.
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let documents = first_row(self.documents);
        let distances = first_row(self.distances);
        let metadatas = first_row(self.metadatas);
        anyhow::ensure!(
            documents.len() == ids.len(),
            "Chroma returned {} documents for {} ids",
            documents.len(),
            ids.len()
        );

        ids.into_iter()
            .enumerate()
            .map(|(idx, id)| {
                let text = documents[idx]
                    .clone()
                    .ok_or_else(|| anyhow!("Chroma chunk {id} has no document text"))?;
                let distance = distances.get(idx).copied().flatten();
                let source = metadatas
                    .get(idx)
                    .and_then(|meta| meta.as_ref())
                    .and_then(|meta| meta.get("source"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(RetrievedChunk {
                    id,
                    text,
                    distance,
                    source,
                })
            })
            .collect()
    }
}

fn first_row<T>(rows: Option<Vec<Vec<T>>>) -> Vec<T> {
    rows.and_then(|rows| rows.into_iter().next()).unwrap_or_default()
}
