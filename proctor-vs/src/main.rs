//! proctor-vs - Verification Service
//!
//! Receives alerts and heartbeats from edge proctoring devices, confirms
//! alerts with a face detector and closes sessions into reports.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use proctor_common::config::{
    load_toml_config, locate_config_file, LoggingConfig, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use proctor_common::events::EventBus;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proctor_vs::collab::{FsImageStore, JsonReportRenderer, RemoteDetector};
use proctor_vs::config::{ConfigOverrides, ServiceConfig};
use proctor_vs::db::{init_database_pool, SessionJournal};
use proctor_vs::pipeline::{Pipeline, PipelineParts};
use proctor_vs::AppState;

const MODULE_NAME: &str = "proctor-vs";

/// Command-line arguments for proctor-vs
#[derive(Parser, Debug)]
#[command(name = "proctor-vs")]
#[command(about = "Second-tier alert verification service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PROCTOR_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "PROCTOR_HOST")]
    host: Option<String>,

    /// Root folder holding the database, images and reports
    #[arg(short, long, env = "PROCTOR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "PROCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Face detector endpoint
    #[arg(long, env = "PROCTOR_DETECTOR_URL")]
    detector_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| locate_config_file(MODULE_NAME));
    let loaded = config_path.as_deref().map(load_toml_config).transpose();
    let toml_config = match &loaded {
        Ok(Some(config)) => config.clone(),
        _ => TomlConfig::default(),
    };

    init_tracing(&toml_config.logging)?;

    info!(
        "Starting {} v{} ({}, {} build, built {})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );

    match (&config_path, loaded) {
        (Some(path), Ok(_)) => info!("Configuration: {}", path.display()),
        (None, _) => info!("No configuration file found, using defaults"),
        (Some(path), Err(e)) => {
            return Err(e).with_context(|| format!("Failed to load {}", path.display()))
        }
    }

    let config = ServiceConfig::resolve(
        &toml_config,
        &ConfigOverrides {
            host: args.host,
            port: args.port,
            detector_url: args.detector_url,
        },
    )?;

    // Root folder: CLI/env > TOML > platform default
    let root_folder = match args.root_folder {
        Some(folder) => folder,
        None => {
            let resolver = RootFolderResolver::new(MODULE_NAME);
            match config_path {
                Some(_) => resolver.with_config(toml_config.clone()).resolve(),
                None => resolver.resolve(),
            }
        }
    };
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    let db_path = initializer.database_path();
    let pool = init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    let journal = SessionJournal::new(pool);

    let detector = RemoteDetector::new(config.detector_url.clone(), config.detector_timeout)?;
    info!("Face detector: {}", detector.url());

    let store = FsImageStore::open(&initializer.images_dir())
        .await
        .context("Failed to open image store")?;
    let renderer = JsonReportRenderer::open(&initializer.reports_dir())
        .await
        .context("Failed to open report directory")?;

    let events = EventBus::new(256);

    let pipeline = Arc::new(
        Pipeline::start(
            PipelineParts {
                detector: Arc::new(detector),
                store: Arc::new(store),
                renderer: Arc::new(renderer),
                journal,
                events,
            },
            config.pipeline_settings(),
        )
        .await
        .context("Failed to start verification pipeline")?,
    );

    let state = AppState::new(pipeline.clone());
    let app = proctor_vs::build_router(state).layer(TraceLayer::new_for_http());

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pipeline.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Console logging, plus a plain-text file when `logging.file` is set
///
/// `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
