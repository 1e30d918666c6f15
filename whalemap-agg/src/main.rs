//! whalemap-agg - Marine mammal sighting aggregator microservice
//!
//! **Module Identity:**
//! - Name: whalemap-agg
//! - Port: 5730 (default)
//!
//! Pulls sightings from the citizen-science, regional-network, vessel and local
//! sources, publishes the merged collection and inferred travels over HTTP REST
//! and SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use whalemap_agg::config::{AggConfig, CONFIG_ENV_VAR};
use whalemap_agg::AppState;

const DEFAULT_LOG_FILTER: &str = "whalemap_agg=info,tower_http=info";

/// Command-line arguments for whalemap-agg
#[derive(Parser, Debug)]
#[command(name = "whalemap-agg")]
#[command(about = "Marine mammal sighting aggregator")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "WHALEMAP_AGG_PORT")]
    port: Option<u16>,

    /// Explicit config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first so its log level can seed the filter
    let loaded = AggConfig::load(args.config.as_deref());
    let level = loaded
        .as_ref()
        .map(|(config, _)| config.logging.level.clone())
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // A malformed file is fatal; reported once logging is up
    let (config, config_path) = loaded.context("Failed to load configuration")?;

    let port = args.port.unwrap_or(config.port);
    info!("Starting whalemap-agg (sighting aggregator) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => warn!("No config file found, using defaults"),
    }

    let state = AppState::from_config(&config).context("Failed to initialize aggregator")?;
    info!(
        adapters = ?state.pipeline.adapter_names(),
        "Aggregation pipeline initialized"
    );

    // Initial generation
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let report = pipeline.refresh().await;
        info!(
            generation = report.generation,
            published = report.published,
            travels = report.travels,
            failed = report.failed.len(),
            "Initial fetch complete"
        );
    });

    let app = whalemap_agg::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
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
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install terminate handler: {}", e);
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
