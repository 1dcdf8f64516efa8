use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use clap::Parser;
use httpmock::prelude::*;
use httpmock::Mock;
use pretty_assertions::assert_eq;
use ragscope::readiness::STARTING_MESSAGE;
use ragscope::{router, AppState, ServiceCli, NO_DOCUMENTS_MESSAGE};
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "ragscope-test-boundary";

struct Backends {
    ollama: MockServer,
    chroma: MockServer,
    mlflow: MockServer,
}

impl Backends {
    async fn start() -> Self {
        Self {
            ollama: MockServer::start_async().await,
            chroma: MockServer::start_async().await,
            mlflow: MockServer::start_async().await,
        }
    }

    fn state(&self) -> AppState {
        let port = self.chroma.port().to_string();
        let ollama = self.ollama.base_url();
        let mlflow = self.mlflow.base_url();
        let host = self.chroma.host();
        let cli = ServiceCli::try_parse_from([
            "ragscope-api",
            "--ollama-base-url",
            ollama.as_str(),
            "--chroma-host",
            host.as_str(),
            "--chroma-port",
            port.as_str(),
            "--mlflow-tracking-uri",
            mlflow.as_str(),
            "--request-timeout-secs",
            "5",
        ])
        .expect("cli parses");
        let settings = cli.build_settings().expect("settings");
        AppState::from_settings(&settings).expect("state")
    }

    fn ready_app(&self) -> Router {
        let state = self.state();
        state.readiness.mark_ready();
        router(state, 1024 * 1024)
    }

    async fn collection(&self) -> Mock<'_> {
        self.chroma
            .mock_async(|when, then| {
                when.method(POST).path("/api/v1/collections");
                then.status(200)
                    .json_body(json!({ "id": "c0ffee", "name": "documents" }));
            })
            .await
    }

    async fn count(&self, stored: usize) -> Mock<'_> {
        self.chroma
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/collections/c0ffee/count");
                then.status(200).body(stored.to_string());
            })
            .await
    }

    /// Mocks a full MLflow run lifecycle and returns the runs/create mock.
    async fn tracking(&self) -> Mock<'_> {
        self.mlflow
            .mock_async(|when, then| {
                when.method(GET).path("/api/2.0/mlflow/experiments/get-by-name");
                then.status(200)
                    .json_body(json!({ "experiment": { "experiment_id": "1" } }));
            })
            .await;
        let create = self
            .mlflow
            .mock_async(|when, then| {
                when.method(POST).path("/api/2.0/mlflow/runs/create");
                then.status(200).json_body(json!({
                    "run": { "info": {
                        "run_id": "run-1",
                        "artifact_uri": "mlflow-artifacts:/1/run-1/artifacts"
                    } }
                }));
            })
            .await;
        self.mlflow
            .mock_async(|when, then| {
                when.method(POST).path("/api/2.0/mlflow/runs/log-batch");
                then.status(200).json_body(json!({}));
            })
            .await;
        self.mlflow
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/api/2.0/mlflow-artifacts/artifacts/1/run-1/artifacts/answer.txt");
                then.status(200).json_body(json!({}));
            })
            .await;
        self.mlflow
            .mock_async(|when, then| {
                when.method(POST).path("/api/2.0/mlflow/runs/update");
                then.status(200).json_body(json!({}));
            })
            .await;
        create
    }
}

fn upload(filename: &str, contents: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Request::builder()
        .method("POST")
        .uri("/ingest")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn query(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/query")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn every_route_is_refused_until_models_are_ready() {
    let backends = Backends::start().await;
    let state = backends.state();
    let app = router(state, 1024);

    let health = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app.clone(), health).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "detail": STARTING_MESSAGE }));

    let (status, _) = send(app, query(json!({ "question": "hi" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unsupported_upload_never_reaches_the_store() {
    let backends = Backends::start().await;
    let collection = backends.collection().await;

    let (status, body) = send(backends.ready_app(), upload("notes.docx", b"hello")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["detail"],
        "Unsupported file type '.docx'. Only .pdf and .txt are accepted."
    );
    collection.assert_hits_async(0).await;
}

#[tokio::test]
async fn text_upload_is_windowed_embedded_and_stored() {
    let backends = Backends::start().await;
    backends.collection().await;
    let embed = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embed")
                .json_body_partial(r#"{ "model": "nomic-embed-text" }"#);
            then.status(200).json_body(json!({
                "embeddings": [[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]
            }));
        })
        .await;
    let add = backends
        .chroma
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/c0ffee/add")
                .body_contains(r#""ids":["notes.txt_0","notes.txt_1","notes.txt_2"]"#);
            then.status(201).json_body(json!(true));
        })
        .await;

    let text = "a".repeat(1200);
    let (status, body) = send(backends.ready_app(), upload("notes.txt", text.as_bytes())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "ok", "chunks_stored": 3, "filename": "notes.txt" })
    );
    embed.assert_hits_async(1).await;
    add.assert_async().await;
}

#[tokio::test]
async fn pdf_upload_is_extracted_and_stored() {
    let backends = Backends::start().await;
    backends.collection().await;
    let embed = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embed")
                .body_contains("Hello");
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2]] }));
        })
        .await;
    let add = backends
        .chroma
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/c0ffee/add")
                .body_contains(r#""ids":["report.pdf_0"]"#);
            then.status(201).json_body(json!(true));
        })
        .await;

    let pdf = include_bytes!("fixtures/hello.pdf");
    let (status, body) = send(backends.ready_app(), upload("report.pdf", pdf)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filename"], "report.pdf");
    assert!(body["chunks_stored"].as_u64().unwrap_or_default() >= 1);
    embed.assert_async().await;
    add.assert_async().await;
}

#[tokio::test]
async fn non_utf8_text_upload_is_unprocessable() {
    let backends = Backends::start().await;
    let collection = backends.collection().await;

    let (status, body) = send(
        backends.ready_app(),
        upload("notes.txt", &[0xff, 0xfe, 0x00, 0x80]),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"]
        .as_str()
        .unwrap_or_default()
        .starts_with("file is not valid UTF-8 text"));
    collection.assert_hits_async(0).await;
}

#[tokio::test]
async fn unreachable_store_fails_ingest_with_503() {
    let backends = Backends::start().await;
    backends
        .chroma
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/collections");
            then.status(500).body("chroma exploded");
        })
        .await;
    let embed = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2]] }));
        })
        .await;

    let (status, body) = send(backends.ready_app(), upload("notes.txt", b"some text")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.starts_with("ChromaDB unreachable:"), "detail was {detail}");
    assert!(detail.contains("chroma exploded"), "detail was {detail}");
    embed.assert_hits_async(0).await;
}

#[tokio::test]
async fn embedding_failure_fails_ingest_with_503() {
    let backends = Backends::start().await;
    backends.collection().await;
    backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(500).body("embedder down");
        })
        .await;
    let add = backends
        .chroma
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/collections/c0ffee/add");
            then.status(201).json_body(json!(true));
        })
        .await;

    let (status, body) = send(backends.ready_app(), upload("notes.txt", b"some text")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.contains("embedder down"), "detail was {detail}");
    add.assert_hits_async(0).await;
}

#[tokio::test]
async fn missing_file_field_is_unprocessable() {
    let backends = Backends::start().await;
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"other\"\r\n\r\n\
         value\r\n\
         --{BOUNDARY}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/ingest")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send(backends.ready_app(), request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], "multipart field 'file' is required");
}

#[tokio::test]
async fn empty_question_is_rejected_before_any_call() {
    let backends = Backends::start().await;
    let collection = backends.collection().await;
    let create_run = backends.tracking().await;

    let (status, _) = send(backends.ready_app(), query(json!({ "question": "   " }))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    collection.assert_hits_async(0).await;
    create_run.assert_hits_async(0).await;
}

#[tokio::test]
async fn zero_top_k_is_rejected() {
    let backends = Backends::start().await;
    let create_run = backends.tracking().await;

    let (status, body) = send(
        backends.ready_app(),
        query(json!({ "question": "x", "top_k": 0 })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["detail"], "top_k must be at least 1");
    create_run.assert_hits_async(0).await;
}

#[tokio::test]
async fn empty_store_returns_404_and_skips_generation() {
    let backends = Backends::start().await;
    backends.collection().await;
    backends.count(0).await;
    let create_run = backends.tracking().await;
    let generate = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(200).json_body(json!({ "response": "unused" }));
        })
        .await;

    let (status, body) = send(
        backends.ready_app(),
        query(json!({ "question": "x", "top_k": 4 })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "detail": NO_DOCUMENTS_MESSAGE }));
    generate.assert_hits_async(0).await;
    create_run.assert_hits_async(1).await;
}

#[tokio::test]
async fn answered_query_is_judged_and_recorded_once() {
    let backends = Backends::start().await;
    backends.collection().await;
    backends.count(2).await;
    let create_run = backends.tracking().await;
    backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2]] }));
        })
        .await;
    backends
        .chroma
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/collections/c0ffee/query")
                .json_body_partial(r#"{ "n_results": 2 }"#);
            then.status(200).json_body(json!({
                "ids": [["a.txt_0", "a.txt_1"]],
                "documents": [["Rust is a language.", "It has ownership."]],
                "distances": [[0.1, 0.2]],
                "metadatas": [[{ "source": "a.txt", "chunk_index": 0 },
                               { "source": "a.txt", "chunk_index": 1 }]]
            }));
        })
        .await;
    let generate = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{ "model": "llama3.2" }"#);
            then.status(200)
                .json_body(json!({ "response": "Rust is a language." }));
        })
        .await;
    let judge = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{ "model": "mistral" }"#);
            then.status(200).json_body(json!({ "response": "Score: 0.9" }));
        })
        .await;

    let (status, body) = send(
        backends.ready_app(),
        query(json!({ "question": "What is Rust?", "top_k": 2 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "Rust is a language.");
    assert_eq!(
        body["sources"],
        json!(["Rust is a language.", "It has ownership."])
    );
    assert!(!body["query_id"].as_str().unwrap_or_default().is_empty());
    generate.assert_hits_async(1).await;
    judge.assert_hits_async(3).await;
    create_run.assert_hits_async(1).await;
}

#[tokio::test]
async fn generation_failure_is_503_and_still_recorded() {
    let backends = Backends::start().await;
    backends.collection().await;
    backends.count(1).await;
    let create_run = backends.tracking().await;
    backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/embed");
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2]] }));
        })
        .await;
    backends
        .chroma
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/collections/c0ffee/query");
            then.status(200).json_body(json!({
                "ids": [["a.txt_0"]],
                "documents": [["Only chunk."]],
                "distances": [[0.1]],
                "metadatas": [[{ "source": "a.txt", "chunk_index": 0 }]]
            }));
        })
        .await;
    let generate = backends
        .ollama
        .mock_async(|when, then| {
            when.method(POST).path("/api/generate");
            then.status(500).body("model crashed");
        })
        .await;

    let (status, body) = send(backends.ready_app(), query(json!({ "question": "x" }))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.starts_with("Error: "), "detail was {detail}");
    assert!(detail.contains("model crashed"), "detail was {detail}");
    // No judge calls after a failed generation.
    generate.assert_hits_async(1).await;
    create_run.assert_hits_async(1).await;
}

#[tokio::test]
async fn health_reports_degraded_dependencies() {
    let backends = Backends::start().await;
    backends
        .chroma
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/heartbeat");
            then.status(200)
                .json_body(json!({ "nanosecond heartbeat": 1 }));
        })
        .await;
    backends
        .ollama
        .mock_async(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(500).body("down");
        })
        .await;

    let health = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(backends.ready_app(), health).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "degraded", "chromadb": "ok", "ollama": "error" })
    );
}
