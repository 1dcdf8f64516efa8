//! Question answering over the stored chunks, with judging and run recording.

use std::time::Instant;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::prompts::{answer_prompt, join_context};
use crate::record::{QueryOutcome, QueryRecord};
use crate::state::AppState;

/// Detail returned when the collection is empty.
pub const NO_DOCUMENTS_MESSAGE: &str = "No documents found. Please ingest documents first.";

/// Body of a `/query` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language question.
    pub question: String,
    /// Retrieval depth; the service default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

/// Body of a successful `/query` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryResponse {
    /// Generated answer.
    pub answer: String,
    /// Texts of the chunks used as context, in rank order.
    pub sources: Vec<String>,
    /// Identifier of this attempt, also recorded on the tracking run.
    pub query_id: String,
}

/// Reasons a query fails.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Question empty after trimming.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// `top_k` of zero.
    #[error("top_k must be at least 1")]
    InvalidTopK,
    /// The collection holds no chunks.
    #[error("No documents found. Please ingest documents first.")]
    NoDocuments,
    /// A backing service failed.
    #[error("Error: {0:#}")]
    Dependency(anyhow::Error),
}

/// Resolves the retrieval depth: default when absent, clamped to `max_top_k`.
pub fn effective_top_k(
    requested: Option<usize>,
    default_top_k: usize,
    max_top_k: usize,
) -> Result<usize, QueryError> {
    match requested {
        Some(0) => Err(QueryError::InvalidTopK),
        Some(k) => Ok(k.min(max_top_k)),
        None => Ok(default_top_k.min(max_top_k)),
    }
}

/// Answers `request` and records exactly one tracking run for it.
///
/// Validation failures return before any external call and record nothing.
pub async fn handle_query(
    state: &AppState,
    request: QueryRequest,
) -> Result<QueryResponse, QueryError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(QueryError::EmptyQuestion);
    }
    let top_k = effective_top_k(request.top_k, state.default_top_k, state.max_top_k)?;
    let query_id = Uuid::new_v4().to_string();

    let started = Instant::now();
    let mut sources = Vec::new();
    let result = retrieve_and_answer(state, question, top_k, &mut sources).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let judge = match &result {
        Ok(answer) if !sources.is_empty() => {
            let context = join_context(&sources);
            Some(state.judge.evaluate(question, &context, answer).await)
        }
        _ => None,
    };

    let (answer, outcome) = match &result {
        Ok(answer) => (answer.clone(), QueryOutcome::Answered),
        Err(QueryError::NoDocuments) => (String::new(), QueryOutcome::NoDocuments),
        Err(err) => (
            String::new(),
            QueryOutcome::Failed {
                error: dependency_cause(err),
            },
        ),
    };
    let record = QueryRecord {
        query_id: query_id.clone(),
        question: question.to_string(),
        top_k,
        generation_model: state.generator.name().to_string(),
        judge_model: state.judge.model_name().to_string(),
        sources: sources.clone(),
        answer,
        latency_ms,
        outcome,
        judge,
    };
    match state.tracker.record(&record).await {
        Ok(run_id) => info!(%query_id, %run_id, latency_ms, "query recorded"),
        Err(err) => {
            let error = format!("{err:#}");
            warn!(
                %query_id,
                experiment = state.tracker.experiment(),
                %error,
                "failed to record query run"
            );
        }
    }

    let answer = result?;
    Ok(QueryResponse {
        answer,
        sources,
        query_id,
    })
}

async fn retrieve_and_answer(
    state: &AppState,
    question: &str,
    top_k: usize,
    sources: &mut Vec<String>,
) -> Result<String, QueryError> {
    let stored = state
        .store
        .count()
        .await
        .map_err(QueryError::Dependency)?;
    if stored == 0 {
        return Err(QueryError::NoDocuments);
    }

    let embedding = state
        .embedder
        .embed_one(question)
        .await
        .context("failed to embed question")
        .map_err(QueryError::Dependency)?;
    let hits = state
        .store
        .query(&embedding, top_k)
        .await
        .map_err(QueryError::Dependency)?;
    sources.extend(hits.into_iter().map(|hit| hit.text));

    let prompt = answer_prompt(question, &join_context(sources));
    state
        .generator
        .complete(&prompt)
        .await
        .context("failed to generate answer")
        .map_err(QueryError::Dependency)
}

fn dependency_cause(err: &QueryError) -> String {
    match err {
        QueryError::Dependency(cause) => format!("{cause:#}"),
        other => other.to_string(),
    }
}
