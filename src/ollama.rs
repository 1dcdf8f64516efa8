//! Async client for an Ollama model server: embeddings, completions and model management.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Timeout for liveness checks, independent of the request timeout.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared HTTP handle to one Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    // Pulls stream whole model files; they get no timeout.
    pull_client: Client,
    base_url: String,
}

impl OllamaClient {
    /// Builds a client for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Ollama base URL must be an http(s) URL"
        );
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        let pull_client = Client::builder()
            .build()
            .context("failed to build Ollama pull client")?;
        Ok(Self {
            client,
            pull_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Binds this client to a model name.
    pub fn model(&self, name: impl Into<String>) -> ModelHandle {
        ModelHandle {
            client: self.clone(),
            model: name.into(),
        }
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Embeds each input independently and returns vectors in input order.
    pub async fn embed(&self, model: &str, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let endpoint = self.endpoint("/api/embed");
        let request = EmbedRequest {
            model,
            input: inputs,
        };
        let resp = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to call Ollama embeddings at {endpoint}"))?;
        let parsed: EmbedResponse = read_json(resp, "embeddings").await?;
        anyhow::ensure!(
            parsed.embeddings.len() == inputs.len(),
            "Ollama returned {} embeddings for {} inputs",
            parsed.embeddings.len(),
            inputs.len()
        );
        if let Some(first) = parsed.embeddings.first() {
            let dims = first.len();
            anyhow::ensure!(dims > 0, "Ollama returned an empty embedding");
            anyhow::ensure!(
                parsed.embeddings.iter().all(|e| e.len() == dims),
                "Ollama returned embeddings of mixed dimensionality"
            );
        }
        Ok(parsed.embeddings)
    }

    /// Requests one non-streaming completion for `prompt`.
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String> {
        let endpoint = self.endpoint("/api/generate");
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature: 0.0 },
        };
        let resp = self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to call Ollama generate at {endpoint}"))?;
        let parsed: GenerateResponse = read_json(resp, "generate").await?;
        Ok(parsed.response)
    }

    /// Asks the server to download `model`; returns once the pull completes.
    pub async fn pull(&self, model: &str) -> Result<()> {
        let endpoint = self.endpoint("/api/pull");
        let request = PullRequest {
            model,
            stream: false,
        };
        let resp = self
            .pull_client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to call Ollama pull at {endpoint}"))?;
        let parsed: PullResponse = read_json(resp, "pull").await?;
        if let Some(error) = parsed.error {
            anyhow::bail!("Ollama pull of {model} failed: {error}");
        }
        anyhow::ensure!(
            parsed.status.as_deref() == Some("success"),
            "Ollama pull of {model} ended with status {:?}",
            parsed.status
        );
        Ok(())
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let tags = self.fetch_tags(None).await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether `model` is installed; an untagged name matches `name:latest`.
    pub async fn has_model(&self, model: &str) -> Result<bool> {
        let installed = self.list_models().await?;
        Ok(installed.iter().any(|name| model_matches(name, model)))
    }

    /// Liveness check against the tag listing.
    pub async fn ping(&self) -> Result<()> {
        self.fetch_tags(Some(LIVENESS_TIMEOUT)).await.map(|_| ())
    }

    async fn fetch_tags(&self, timeout: Option<Duration>) -> Result<TagsResponse> {
        let endpoint = self.endpoint("/api/tags");
        let mut request = self.client.get(&endpoint);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("failed to call Ollama tags at {endpoint}"))?;
        read_json(resp, "tags").await
    }
}

/// An [`OllamaClient`] bound to one model name.
#[derive(Clone)]
pub struct ModelHandle {
    client: OllamaClient,
    model: String,
}

impl ModelHandle {
    /// Bound model name.
    pub fn name(&self) -> &str {
        &self.model
    }

    /// Embeds a batch of inputs with the bound model.
    pub async fn embed(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.client.embed(&self.model, inputs).await
    }

    /// Embeds one input with the bound model.
    pub async fn embed_one(&self, input: &str) -> Result<Vec<f32>> {
        self.embed(&[input])
            .await?
            .pop()
            .ok_or_else(|| anyhow!("Ollama returned no embedding"))
    }

    /// Requests one completion from the bound model.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        self.client.generate(&self.model, prompt).await
    }
}

fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    !wanted.contains(':') && installed.strip_suffix(":latest") == Some(wanted)
}

async fn read_json<T: for<'de> Deserialize<'de>>(resp: reqwest::Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        anyhow::bail!("Ollama {what} request failed ({status}): {body}");
    }
    resp.json()
        .await
        .with_context(|| format!("failed to parse Ollama {what} response"))
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> OllamaClient {
        OllamaClient::new(&server.base_url(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn embeds_batch_in_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body(json!({ "model": "nomic-embed-text", "input": ["a", "b"] }));
                then.status(200)
                    .json_body(json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] }));
            })
            .await;

        let out = client(&server)
            .model("nomic-embed-text")
            .embed(&["a", "b"])
            .await
            .expect("embeddings");
        mock.assert_async().await;
        assert_eq!(out, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn rejects_mismatched_embedding_count() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1]] }));
            })
            .await;

        let err = client(&server)
            .embed("m", &["a", "b"])
            .await
            .expect_err("count mismatch");
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));
    }

    #[tokio::test]
    async fn generate_returns_response_text() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{ "model": "llama3.2", "stream": false }"#);
                then.status(200)
                    .json_body(json!({ "response": "Paris.", "done": true }));
            })
            .await;

        let answer = client(&server)
            .model("llama3.2")
            .complete("Capital of France?")
            .await
            .expect("completion");
        assert_eq!(answer, "Paris.");
    }

    #[tokio::test]
    async fn generate_surfaces_server_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500)
                    .json_body(json!({ "error": "model 'llama3.2' not found" }));
            })
            .await;

        let err = client(&server)
            .generate("llama3.2", "hi")
            .await
            .expect_err("server error");
        let text = err.to_string();
        assert!(text.contains("500"), "{text}");
        assert!(text.contains("not found"), "{text}");
    }

    #[tokio::test]
    async fn untagged_names_match_latest() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/tags");
                then.status(200).json_body(json!({
                    "models": [
                        { "name": "llama3.2:latest" },
                        { "name": "mistral:7b" }
                    ]
                }));
            })
            .await;

        let ollama = client(&server);
        assert!(ollama.has_model("llama3.2").await.unwrap());
        assert!(ollama.has_model("mistral:7b").await.unwrap());
        assert!(!ollama.has_model("mistral").await.unwrap());
        assert!(!ollama.has_model("nomic-embed-text").await.unwrap());
    }

    #[tokio::test]
    async fn pull_requires_success_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/pull")
                    .json_body(json!({ "model": "mistral", "stream": false }));
                then.status(200).json_body(json!({ "status": "success" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/pull")
                    .json_body(json!({ "model": "missing", "stream": false }));
                then.status(200)
                    .json_body(json!({ "error": "pull model manifest: file does not exist" }));
            })
            .await;

        let ollama = client(&server);
        ollama.pull("mistral").await.expect("pull succeeds");
        assert!(ollama.pull("missing").await.is_err());
    }
}
