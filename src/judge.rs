//! LLM-as-judge scoring of generated answers along three quality dimensions.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::ollama::ModelHandle;
use crate::prompts;

/// Metric value written when a dimension could not be scored.
pub const SENTINEL_SCORE: f64 = -1.0;

// ASCII digits only: `\d` would also match digits `f64::from_str` cannot parse.
static SCORE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+\.?[0-9]*)").expect("score pattern compiles"));

/// Quality dimensions rated by the judge model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeDimension {
    /// Answer is supported by the retrieved context.
    Faithfulness,
    /// Answer addresses the question.
    AnswerRelevance,
    /// Retrieved context is relevant to the question.
    ContextRelevance,
}

impl JudgeDimension {
    /// All dimensions, in evaluation order.
    pub const ALL: [JudgeDimension; 3] = [
        JudgeDimension::Faithfulness,
        JudgeDimension::AnswerRelevance,
        JudgeDimension::ContextRelevance,
    ];

    /// Tracking metric key.
    pub fn metric_name(self) -> &'static str {
        match self {
            JudgeDimension::Faithfulness => "faithfulness_score",
            JudgeDimension::AnswerRelevance => "answer_relevance_score",
            JudgeDimension::ContextRelevance => "context_relevance_score",
        }
    }

    /// Tag set on the run when this dimension produced no score.
    pub fn warning_tag(self) -> String {
        format!("{}_parse_warning", self.metric_name())
    }

    fn prompt(self, question: &str, context: &str, answer: &str) -> String {
        match self {
            JudgeDimension::Faithfulness => prompts::faithfulness_prompt(question, context, answer),
            JudgeDimension::AnswerRelevance => prompts::answer_relevance_prompt(question, answer),
            JudgeDimension::ContextRelevance => prompts::context_relevance_prompt(question, context),
        }
    }
}

/// Result of scoring one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeOutcome {
    /// A score in `[0, 1]` was extracted from the reply.
    Scored(f64),
    /// The reply held no number, or the first number was out of range.
    Unparseable {
        /// Raw judge reply.
        reply: String,
    },
    /// The judge call itself failed.
    Failed {
        /// Error description.
        error: String,
    },
}

impl JudgeOutcome {
    /// Classifies a raw judge reply.
    pub fn from_reply(reply: String) -> Self {
        match parse_score(&reply) {
            Some(score) => JudgeOutcome::Scored(score),
            None => JudgeOutcome::Unparseable { reply },
        }
    }

    /// Extracted score, if any.
    pub fn score(&self) -> Option<f64> {
        match self {
            JudgeOutcome::Scored(score) => Some(*score),
            _ => None,
        }
    }

    /// Value written as the tracking metric: the score or [`SENTINEL_SCORE`].
    pub fn metric_value(&self) -> f64 {
        self.score().unwrap_or(SENTINEL_SCORE)
    }

    /// Whether the run should carry a warning tag for this dimension.
    pub fn needs_warning(&self) -> bool {
        self.score().is_none()
    }
}

/// Outcomes for all three dimensions of one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeScores {
    /// Faithfulness outcome.
    pub faithfulness: JudgeOutcome,
    /// Answer relevance outcome.
    pub answer_relevance: JudgeOutcome,
    /// Context relevance outcome.
    pub context_relevance: JudgeOutcome,
}

impl JudgeScores {
    /// Outcome for `dimension`.
    pub fn get(&self, dimension: JudgeDimension) -> &JudgeOutcome {
        match dimension {
            JudgeDimension::Faithfulness => &self.faithfulness,
            JudgeDimension::AnswerRelevance => &self.answer_relevance,
            JudgeDimension::ContextRelevance => &self.context_relevance,
        }
    }

    /// Dimensions paired with their outcomes, in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (JudgeDimension, &JudgeOutcome)> {
        JudgeDimension::ALL.into_iter().map(move |dim| (dim, self.get(dim)))
    }
}

/// Extracts the first decimal number from `reply` when it lies in `[0, 1]`.
pub fn parse_score(reply: &str) -> Option<f64> {
    let found = SCORE_PATTERN.captures(reply.trim())?.get(1)?;
    let value: f64 = found.as_str().parse().ok()?;
    (0.0..=1.0).contains(&value).then_some(value)
}

/// Judge bound to its configured model.
#[derive(Clone)]
pub struct Judge {
    model: ModelHandle,
}

impl Judge {
    /// Wraps the judge model handle.
    pub fn new(model: ModelHandle) -> Self {
        Self { model }
    }

    /// Judge model name.
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Scores one dimension. Never fails; failures become non-scored outcomes.
    pub async fn score(
        &self,
        dimension: JudgeDimension,
        question: &str,
        context: &str,
        answer: &str,
    ) -> JudgeOutcome {
        let prompt = dimension.prompt(question, context, answer);
        let outcome = match self.model.complete(&prompt).await {
            Ok(reply) => JudgeOutcome::from_reply(reply),
            Err(err) => JudgeOutcome::Failed {
                error: format!("{err:#}"),
            },
        };
        match &outcome {
            JudgeOutcome::Unparseable { reply } => {
                warn!(metric = dimension.metric_name(), reply = %reply, "could not parse judge score");
            }
            JudgeOutcome::Failed { error } => {
                warn!(metric = dimension.metric_name(), error = %error, "judge evaluation failed");
            }
            JudgeOutcome::Scored(_) => {}
        }
        outcome
    }

    /// Scores all three dimensions, one judge call each.
    pub async fn evaluate(&self, question: &str, context: &str, answer: &str) -> JudgeScores {
        JudgeScores {
            faithfulness: self
                .score(JudgeDimension::Faithfulness, question, context, answer)
                .await,
            answer_relevance: self
                .score(JudgeDimension::AnswerRelevance, question, context, answer)
                .await,
            context_relevance: self
                .score(JudgeDimension::ContextRelevance, question, context, answer)
                .await,
        }
    }
}
