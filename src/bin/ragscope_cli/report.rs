use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Answered,
    NoDocuments,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub outcome: CaseOutcome,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub sources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub latency_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct EvalSummary {
    pub total_cases: usize,
    pub answered: usize,
    pub no_documents: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct EvalReport {
    pub summary: EvalSummary,
    pub cases: Vec<CaseReport>,
}

impl EvalReport {
    pub fn from_cases(cases: Vec<CaseReport>) -> Self {
        Self {
            summary: summarize(&cases),
            cases,
        }
    }
}

pub fn summarize(cases: &[CaseReport]) -> EvalSummary {
    let count = |outcome: CaseOutcome| cases.iter().filter(|c| c.outcome == outcome).count();
    let total_cases = cases.len();
    let answered = count(CaseOutcome::Answered);
    let ratio = |value: f64| {
        if total_cases == 0 {
            0.0
        } else {
            value / total_cases as f64
        }
    };
    EvalSummary {
        total_cases,
        answered,
        no_documents: count(CaseOutcome::NoDocuments),
        failed: count(CaseOutcome::Failed),
        success_rate: ratio(answered as f64),
        avg_latency_ms: ratio(cases.iter().map(|c| c.latency_ms).sum()),
    }
}

pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let reader = BufReader::new(file);
    let mut cases = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read evaluation line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let case: EvalCase = serde_json::from_str(&line)
            .with_context(|| format!("invalid evaluation record at line {}", idx + 1))?;
        cases.push(case);
    }
    Ok(cases)
}

pub fn render_summary(summary: &EvalSummary) {
    println!("--- Query Evaluation Summary ---");
    println!("cases: {}", summary.total_cases);
    println!("answered: {}", summary.answered);
    println!("no documents: {}", summary.no_documents);
    println!("failed: {}", summary.failed);
    println!("success rate: {:.3}", summary.success_rate);
    println!("avg latency (ms): {:.2}", summary.avg_latency_ms);
}

pub fn write_report(report: &EvalReport, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, report).context("failed to write JSON report")?;
    Ok(())
}

pub fn render_eval_progress(done: usize, total: usize) {
    if total == 0 {
        return;
    }
    let pct = (done as f64 / total as f64) * 100.0;
    print!("\rEvaluating {done}/{total} ({pct:.1}%)");
    let _ = io::stdout().flush();
}
