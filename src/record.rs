//! Per-query record and its projection onto tracking-run params, tags and metrics.

use crate::judge::JudgeScores;

/// Artifact path of the answer text inside a run.
pub const ANSWER_ARTIFACT: &str = "answer.txt";

/// How a query attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// An answer was generated.
    Answered,
    /// The store held no chunks; generation was skipped.
    NoDocuments,
    /// A backing service failed.
    Failed {
        /// Error description, also stored as the artifact text.
        error: String,
    },
}

/// Everything captured about one query attempt.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    /// Identifier returned to the client.
    pub query_id: String,
    /// Question as submitted.
    pub question: String,
    /// Retrieval depth actually used.
    pub top_k: usize,
    /// Generation model name.
    pub generation_model: String,
    /// Judge model name.
    pub judge_model: String,
    /// Retrieved chunk texts in rank order.
    pub sources: Vec<String>,
    /// Generated answer; empty unless answered.
    pub answer: String,
    /// Wall time of retrieval plus generation.
    pub latency_ms: f64,
    /// Terminal state of the attempt.
    pub outcome: QueryOutcome,
    /// Judge outcomes, present when the answer was scored.
    pub judge: Option<JudgeScores>,
}

impl QueryRecord {
    /// Whether the run should be closed as failed.
    pub fn failed(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Failed { .. })
    }

    /// Text stored as the run artifact.
    pub fn artifact_text(&self) -> String {
        match &self.outcome {
            QueryOutcome::Failed { error } => format!("Error: {error}"),
            _ => self.answer.clone(),
        }
    }

    /// Run parameters.
    pub fn params(&self) -> Vec<(String, String)> {
        vec![
            ("question".to_string(), self.question.clone()),
            ("top_k".to_string(), self.top_k.to_string()),
            ("model_name".to_string(), self.generation_model.clone()),
            ("query_id".to_string(), self.query_id.clone()),
        ]
    }

    /// Run tags, including error and judge warning markers.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![
            ("query_id".to_string(), self.query_id.clone()),
            ("generation_model".to_string(), self.generation_model.clone()),
            ("judge_model".to_string(), self.judge_model.clone()),
        ];
        match &self.outcome {
            QueryOutcome::Answered => {}
            QueryOutcome::NoDocuments => {
                tags.push(("outcome".to_string(), "no_documents".to_string()));
            }
            QueryOutcome::Failed { .. } => {
                tags.push(("error".to_string(), "true".to_string()));
            }
        }
        if let Some(judge) = &self.judge {
            for (dimension, outcome) in judge.iter() {
                if outcome.needs_warning() {
                    tags.push((dimension.warning_tag(), "true".to_string()));
                }
            }
        }
        tags
    }

    /// Scalar metrics. Judge scores appear only when the answer was judged,
    /// each either in `[0, 1]` or exactly the sentinel.
    pub fn metrics(&self) -> Vec<(&'static str, f64)> {
        let mut metrics = vec![
            ("latency_ms", self.latency_ms),
            ("num_chunks_retrieved", self.sources.len() as f64),
            (
                "answer_length_chars",
                self.artifact_text().chars().count() as f64,
            ),
        ];
        if let Some(judge) = &self.judge {
            for (dimension, outcome) in judge.iter() {
                metrics.push((dimension.metric_name(), outcome.metric_value()));
            }
        }
        metrics
    }
}
