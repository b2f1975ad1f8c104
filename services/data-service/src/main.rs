mod adapter;
mod helpers;
mod server;
mod store;

use anyhow::{Context, Result};
use clap::Parser;
use sortie_records::CodecRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::helpers::load_config::ServiceConfig;
use crate::server::service::{AppState, create_router};
use crate::store::store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "sortie-data-service",
    about = "Receives and stores mission records from sortie agents",
    version
)]
struct Cli {
    #[arg(short, long, default_value = "config/data-service.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = ServiceConfig::load(&cli.config)?;

    let store = SqliteStore::open(Path::new(&cfg.storage.db_path))
        .context("opening the record store")?;
    let state = Arc::new(AppState {
        codecs: CodecRegistry::standard(),
        store: Arc::new(store),
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.listen_addr))?;

    info!(
        addr = %cfg.server.listen_addr,
        db = %cfg.storage.db_path,
        "Data service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Data service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl-C received; shutting down");
}
