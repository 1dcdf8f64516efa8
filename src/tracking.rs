//! MLflow REST client that records one tracking run per query attempt.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::{QueryRecord, ANSWER_ARTIFACT};

/// MLflow rejects longer param values.
const MAX_PARAM_VALUE_CHARS: usize = 6000;
/// MLflow rejects longer tag values.
const MAX_TAG_VALUE_CHARS: usize = 8000;

const ARTIFACT_SCHEME: &str = "mlflow-artifacts:/";

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Attempt completed, with or without an answer.
    Finished,
    /// A backing service failed during the attempt.
    Failed,
}

/// Identifiers of a created run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunInfo {
    /// Server-generated run id.
    pub run_id: String,
    /// Root artifact location of the run.
    #[serde(default)]
    pub artifact_uri: String,
}

/// HTTP handle to an MLflow tracking server, scoped to one experiment.
#[derive(Clone)]
pub struct MlflowTracker {
    client: Client,
    base_url: String,
    experiment: String,
}

impl MlflowTracker {
    /// Builds a tracker; no request is made until first use.
    pub fn new(tracking_uri: &str, experiment: impl Into<String>, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            tracking_uri.starts_with("http://") || tracking_uri.starts_with("https://"),
            "MLflow tracking URI must be an http(s) URL"
        );
        let experiment = experiment.into();
        anyhow::ensure!(!experiment.trim().is_empty(), "experiment name is required");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build MLflow HTTP client")?;
        Ok(Self {
            client,
            base_url: tracking_uri.trim_end_matches('/').to_string(),
            experiment,
        })
    }

    /// Experiment that receives the runs.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow{}", self.base_url, path)
    }

    /// Writes `record` as one run: create, log params/tags/metrics, upload the
    /// answer artifact, then close the run. Returns the run id.
    ///
    /// Once the run exists it is always closed; a failed logging or upload
    /// step closes it as `FAILED`.
    pub async fn record(&self, record: &QueryRecord) -> Result<String> {
        let experiment_id = self.experiment_id().await?;
        let run_name = Local::now().format("%d-%m-%Y--%H-%M-%S").to_string();
        let run = self
            .create_run(&experiment_id, &run_name, &record.tags())
            .await?;

        let timestamp = Utc::now().timestamp_millis();
        let batch = LogBatchRequest {
            run_id: &run.run_id,
            params: record
                .params()
                .into_iter()
                .map(|(key, value)| KeyValue::new(key, value, MAX_PARAM_VALUE_CHARS))
                .collect(),
            tags: Vec::new(),
            metrics: record
                .metrics()
                .into_iter()
                .map(|(key, value)| MetricEntry {
                    key,
                    value,
                    timestamp,
                    step: 0,
                })
                .collect(),
        };
        let mut step_failed = false;
        if let Err(err) = self
            .post_json::<_, serde_json::Value>("/runs/log-batch", &batch)
            .await
        {
            step_failed = true;
            let error = format!("{err:#}");
            warn!(run_id = %run.run_id, %error, "failed to log run params and metrics");
        }

        if let Err(err) = self
            .log_text(&run, &record.artifact_text(), ANSWER_ARTIFACT)
            .await
        {
            step_failed = true;
            let error = format!("{err:#}");
            warn!(run_id = %run.run_id, %error, "failed to upload answer artifact");
        }

        let status = if record.failed() || step_failed {
            RunStatus::Failed
        } else {
            RunStatus::Finished
        };
        self.finish_run(&run.run_id, status).await?;
        debug!(run_id = %run.run_id, ?status, "recorded query run");
        Ok(run.run_id)
    }

    /// Looks up the experiment by name, creating it when missing.
    pub async fn experiment_id(&self) -> Result<String> {
        let endpoint = self.endpoint("/experiments/get-by-name");
        let resp = self
            .client
            .get(&endpoint)
            .query(&[("experiment_name", self.experiment.as_str())])
            .send()
            .await
            .with_context(|| format!("failed to reach MLflow at {endpoint}"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            let created: CreateExperimentResponse = self
                .post_json(
                    "/experiments/create",
                    &CreateExperimentRequest {
                        name: &self.experiment,
                    },
                )
                .await?;
            return Ok(created.experiment_id);
        }
        let parsed: GetExperimentResponse = read_json(resp, "get experiment").await?;
        Ok(parsed.experiment.experiment_id)
    }

    /// Opens a run in `experiment_id`.
    pub async fn create_run(
        &self,
        experiment_id: &str,
        run_name: &str,
        tags: &[(String, String)],
    ) -> Result<RunInfo> {
        let request = CreateRunRequest {
            experiment_id,
            run_name,
            start_time: Utc::now().timestamp_millis(),
            tags: tags
                .iter()
                .map(|(key, value)| KeyValue::new(key.clone(), value.clone(), MAX_TAG_VALUE_CHARS))
                .collect(),
        };
        let created: CreateRunResponse = self.post_json("/runs/create", &request).await?;
        Ok(created.run.info)
    }

    /// Uploads `text` as `artifact_path` under the run's artifact root.
    ///
    /// Only artifact roots proxied by the tracking server
    /// (`mlflow-artifacts:/...`) are supported.
    pub async fn log_text(&self, run: &RunInfo, text: &str, artifact_path: &str) -> Result<()> {
        let endpoint = self.artifact_endpoint(&run.artifact_uri, artifact_path)?;
        let resp = self
            .client
            .put(&endpoint)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(text.to_string())
            .send()
            .await
            .with_context(|| format!("failed to reach MLflow at {endpoint}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("MLflow artifact upload failed ({status}): {body}");
        }
        Ok(())
    }

    /// Closes the run with `status`.
    pub async fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let request = UpdateRunRequest {
            run_id,
            status,
            end_time: Utc::now().timestamp_millis(),
        };
        let _: serde_json::Value = self.post_json("/runs/update", &request).await?;
        Ok(())
    }

    fn artifact_endpoint(&self, artifact_uri: &str, artifact_path: &str) -> Result<String> {
        let root = artifact_uri.strip_prefix(ARTIFACT_SCHEME).ok_or_else(|| {
            anyhow!("artifact root {artifact_uri:?} is not served by the tracking server")
        })?;
        Ok(format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}",
            self.base_url,
            root.trim_matches('/'),
            artifact_path
        ))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let endpoint = self.endpoint(path);
        let resp = self
            .client
            .post(&endpoint)
            .json(body)
            .send()
            .await
            .with_context(|| format!("failed to reach MLflow at {endpoint}"))?;
        read_json(resp, path).await
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(resp: reqwest::Response, what: &str) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        anyhow::bail!("MLflow {what} request failed ({status}): {body}");
    }
    resp.json()
        .await
        .with_context(|| format!("failed to parse MLflow {what} response"))
}

fn truncate_chars(value: String, max: usize) -> String {
    if value.chars().count() <= max {
        return value;
    }
    value.chars().take(max).collect()
}

#[derive(Serialize)]
struct KeyValue {
    key: String,
    value: String,
}

impl KeyValue {
    fn new(key: String, value: String, max_value_chars: usize) -> Self {
        Self {
            key,
            value: truncate_chars(value, max_value_chars),
        }
    }
}

#[derive(Serialize)]
struct MetricEntry {
    key: &'static str,
    value: f64,
    timestamp: i64,
    step: i64,
}

#[derive(Serialize)]
struct CreateExperimentRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: ExperimentEntry,
}

#[derive(Deserialize)]
struct ExperimentEntry {
    experiment_id: String,
}

#[derive(Serialize)]
struct CreateRunRequest<'a> {
    experiment_id: &'a str,
    run_name: &'a str,
    start_time: i64,
    tags: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct CreateRunResponse {
    run: RunEnvelope,
}

#[derive(Deserialize)]
struct RunEnvelope {
    info: RunInfo,
}

#[derive(Serialize)]
struct LogBatchRequest<'a> {
    run_id: &'a str,
    params: Vec<KeyValue>,
    tags: Vec<KeyValue>,
    metrics: Vec<MetricEntry>,
}

#[derive(Serialize)]
struct UpdateRunRequest<'a> {
    run_id: &'a str,
    status: RunStatus,
    end_time: i64,
}
