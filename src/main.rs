//! samplehub - sample-workspace server
//!
//! Serves the browser editor, accepts audio uploads into per-workspace
//! storage, and drives slicing, analysis and merging over one WebSocket per
//! client. Background processing results are pushed back on that socket.

use clap::Parser as ClapParser;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use samplehub::{
    api,
    config::{Config, ConfigError},
    media::Toolkit,
    state_store::{StateStore, StoreError},
    storage::Storage,
};

/// samplehub - sample-workspace server
#[derive(ClapParser, Debug)]
#[command(name = "samplehub", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server
    #[arg(long, env = "SAMPLEHUB_BIND")]
    bind: Option<SocketAddr>,

    /// Root directory for workspace storage and the state database
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Directory static assets are served from
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(long, env = "SAMPLEHUB_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let cli = Cli::parse();
    init_tracing();

    let config = resolve_config(&cli)?;
    run_server(config).await
}

/// Defaults, then the config file, then CLI flags.
fn resolve_config(cli: &Cli) -> Result<Config, ServerError> {
    let mut config = match &cli.config {
        Some(path) => match Config::load(path)? {
            Some(config) => config,
            None => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(storage) = &cli.storage {
        config.storage_dir = storage.clone();
    }
    if let Some(assets) = &cli.assets {
        config.asset_root = assets.clone();
    }
    Ok(config)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "samplehub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(config: Config) -> Result<(), ServerError> {
    tokio::fs::create_dir_all(&config.storage_dir).await?;
    let storage = Storage::new(&config.storage_dir);
    let states = StateStore::open(&storage.state_db_path()).await?;
    let toolkit = Toolkit::from_config(&config.tools);
    let assets = api::web::Assets::new(&config.asset_root, config.version.clone());

    let state = api::AppState::new(storage, states.clone(), toolkit, assets);
    let shutdown = state.shutdown.clone();
    tracing::info!(server_id = %state.server_id, storage = %config.storage_dir.display(), "samplehub starting");

    let app = api::router(
        state,
        api::RouterConfig {
            upload_limit_bytes: config.upload_limit_bytes,
        },
    );

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %config.bind, "listening");

    let serve_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl+C");

    // Signal WebSocket handlers to send close frames, then stop accepting.
    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "server error"),
        Err(e) => tracing::warn!(error = %e, "server task panicked"),
    }

    states.close().await;
    tracing::info!("samplehub stopped");
    Ok(())
}
