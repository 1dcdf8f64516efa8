use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ragscope::{ErrorBody, IngestReport, QueryRequest, QueryResponse};
use reqwest::blocking::{multipart, Client, Response};
use reqwest::StatusCode;

#[path = "ragscope_cli/report.rs"]
mod report;

use report::{CaseOutcome, CaseReport, EvalReport};

#[derive(Parser, Debug)]
#[command(
    name = "ragscope-cli",
    about = "Upload documents to and query a running ragscope-api"
)]
struct Cli {
    /// Base URL of the ragscope-api service
    #[arg(long, env = "RAGSCOPE_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    /// Seconds before a request times out
    #[arg(long, env = "RAGSCOPE_CLI_TIMEOUT_SECS", default_value_t = 300)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload .txt or .pdf files for ingestion
    Ingest {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask one question
    Ask {
        /// Question to answer from the ingested documents
        #[arg(long)]
        question: String,

        /// Number of chunks to retrieve
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Run a JSONL file of questions and summarize the outcomes
    Eval {
        /// JSONL file with one {question, top_k?, notes?} object per line
        #[arg(long)]
        cases: PathBuf,

        /// Optional JSON report output path
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::builder()
        .timeout(Duration::from_secs(cli.timeout_secs.max(1)))
        .build()
        .context("failed to build HTTP client")?;
    let base_url = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Command::Ingest { paths } => {
            for path in paths {
                let report = ingest_file(&client, &base_url, &path)?;
                println!("{}: {} chunks stored", report.filename, report.chunks_stored);
            }
        }
        Command::Ask { question, top_k } => {
            let response = ask(&client, &base_url, &QueryRequest { question, top_k })?;
            println!("--- Answer ---\n{}", response.answer.trim());
            println!("\n--- Sources ---");
            for (idx, source) in response.sources.iter().enumerate() {
                println!("[{}] {}", idx + 1, snippet(source));
            }
            println!("\nquery_id: {}", response.query_id);
        }
        Command::Eval { cases, report_json } => {
            let cases = report::load_cases(&cases)?;
            anyhow::ensure!(!cases.is_empty(), "evaluation file contains no cases");
            let total = cases.len();
            let mut results = Vec::with_capacity(total);
            for (idx, case) in cases.into_iter().enumerate() {
                results.push(run_case(&client, &base_url, case));
                report::render_eval_progress(idx + 1, total);
            }
            println!();
            let report = EvalReport::from_cases(results);
            report::render_summary(&report.summary);
            if let Some(path) = report_json {
                report::write_report(&report, &path)?;
                println!("wrote JSON report to {:?}", path);
            }
        }
    }
    Ok(())
}

fn ingest_file(client: &Client, base_url: &str, path: &Path) -> Result<IngestReport> {
    let form = multipart::Form::new()
        .file("file", path)
        .with_context(|| format!("failed to read {:?}", path))?;
    let url = format!("{base_url}/ingest");
    let resp = client
        .post(&url)
        .multipart(form)
        .send()
        .with_context(|| format!("failed to call {url}"))?;
    read_success(resp)
}

fn ask(client: &Client, base_url: &str, request: &QueryRequest) -> Result<QueryResponse> {
    let resp = send_query(client, base_url, request)?;
    read_success(resp)
}

fn send_query(client: &Client, base_url: &str, request: &QueryRequest) -> Result<Response> {
    let url = format!("{base_url}/query");
    client
        .post(&url)
        .json(request)
        .send()
        .with_context(|| format!("failed to call {url}"))
}

fn run_case(client: &Client, base_url: &str, case: report::EvalCase) -> CaseReport {
    let request = QueryRequest {
        question: case.question.clone(),
        top_k: case.top_k,
    };
    let start = Instant::now();
    let mut report = CaseReport {
        question: case.question,
        notes: case.notes,
        outcome: CaseOutcome::Failed,
        status: 0,
        query_id: None,
        answer: None,
        sources: 0,
        detail: None,
        latency_ms: 0.0,
    };
    match send_query(client, base_url, &request) {
        Ok(resp) => {
            let status = resp.status();
            report.status = status.as_u16();
            if status.is_success() {
                match resp.json::<QueryResponse>() {
                    Ok(parsed) => {
                        report.outcome = CaseOutcome::Answered;
                        report.sources = parsed.sources.len();
                        report.query_id = Some(parsed.query_id);
                        report.answer = Some(parsed.answer);
                    }
                    Err(err) => report.detail = Some(format!("invalid response: {err}")),
                }
            } else {
                if status == StatusCode::NOT_FOUND {
                    report.outcome = CaseOutcome::NoDocuments;
                }
                report.detail = Some(error_detail(resp));
            }
        }
        Err(err) => report.detail = Some(format!("{err:#}")),
    }
    report.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    report
}

fn read_success<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        bail!("server returned {}: {}", status, error_detail(resp));
    }
    resp.json().context("failed to parse server response")
}

fn error_detail(resp: Response) -> String {
    let body = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => parsed.detail,
        Err(_) => body,
    }
}

fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let mut snippet = trimmed.chars().take(MAX_CHARS).collect::<String>();
    snippet.push('…');
    snippet
}
