use anyhow::{Context, Result};
use clap::Parser;
use ragscope::{router, spawn_model_gate, AppState, LogFormat, ServiceCli};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServiceCli::parse();
    init_tracing(cli.log_format);
    let settings = cli.build_settings()?;
    let state = AppState::from_settings(&settings)?;

    let models = settings
        .models
        .required()
        .iter()
        .map(|name| name.to_string())
        .collect();
    spawn_model_gate(state.ollama.clone(), models, state.readiness.clone());

    let app = router(state, settings.max_upload_bytes);
    let addr = settings.bind;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        chroma = %settings.chroma_base_url,
        mlflow = %settings.mlflow_tracking_uri,
        experiment = %settings.experiment,
        "ragscope-api listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
