//! intake-svc - Document Intake microservice
//!
//! Accepts invoice and delivery-note files, drives each through upload,
//! duplicate check and OCR classification against the backend, and
//! streams per-file progress over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use intake_common::events::EventBus;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intake_svc::config::IntakeConfig;
use intake_svc::services::{HttpUploadClient, IntakeOrchestrator, OrchestratorSettings};
use intake_svc::AppState;

/// Command-line arguments for intake-svc
#[derive(Parser, Debug)]
#[command(name = "intake-svc")]
#[command(about = "Document intake microservice")]
#[command(version)]
struct Args {
    /// Config file (defaults to ~/.config/intake/intake-svc.toml)
    #[arg(short, long, env = "INTAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "INTAKE_PORT")]
    port: Option<u16>,

    /// Base URL of the OCR backend
    #[arg(long, env = "INTAKE_BACKEND_URL")]
    backend_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = IntakeConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(backend_url) = args.backend_url {
        config.backend.base_url = backend_url;
    }
    config.validate().context("Invalid configuration")?;

    // Initialize tracing; RUST_LOG wins over the config file
    let default_filter = format!(
        "intake_svc={level},intake_common={level},tower_http={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting intake-svc (Document Intake) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        backend = %config.backend.base_url,
        concurrency_limit = config.scheduler.concurrency_limit,
        duplicate_check = config.pipeline.duplicate_check_enabled,
        "Pipeline configured"
    );

    let event_bus = EventBus::new(config.events.capacity);

    let backend = HttpUploadClient::new(config.backend.clone())
        .context("Failed to initialize backend client")?;
    let orchestrator = IntakeOrchestrator::new(
        Arc::new(backend),
        event_bus,
        OrchestratorSettings::from_config(&config),
    )
    .context("Failed to initialize orchestrator")?;

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;

    let state = AppState::new(orchestrator, config);
    let app = intake_svc::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
