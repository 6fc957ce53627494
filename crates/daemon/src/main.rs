// canvasd: HTTP server over the thread, artifact and key-value stores.

use std::path::PathBuf;

use anyhow::Context;
use canvas_daemon::api::{self, ApiState};
use canvas_daemon::config::EngineConfig;
use canvas_daemon::store::open_stores;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "canvasd", about = "Canvas conversation and artifact server")]
struct Args {
    /// Config file; defaults to ~/.canvas/config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, overriding the config file.
    #[arg(long)]
    listen: Option<String>,
    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
            .with_env_overrides(|key| std::env::var(key)),
        None => EngineConfig::load(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    init_tracing(&config.log_filter, args.json_logs);

    let stores = open_stores(&config.storage).await.context("failed to open stores")?;
    let app = api::router(ApiState::from_stores(stores));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, backend = ?config.storage.backend, "starting canvasd");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("canvasd exited unexpectedly")
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(config_filter: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
