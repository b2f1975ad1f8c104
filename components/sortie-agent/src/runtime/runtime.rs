// Local crates
use crate::commands::builtins::standard_registry;
use crate::commands::dispatch::run_dispatch_loop;
use crate::cursor::store::CursorStore;
use crate::helpers::load_config::Config;
use crate::runtime::pipeline::Pipeline;
use crate::sync::client::{SyncClient, SyncShared};

// External crates
use anyhow::{Context, Result};
use sortie_records::CodecRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wire up and run the whole agent: cursor store, sync client, pipeline
/// task, and the interactive control loop on this task.
///
/// One cancellation token is the only shared stop signal. It is cancelled by
/// the `exit` command, Ctrl-C, or a fatal pipeline error, and observed at
/// safe points only: between lines in the pipeline, between commands here.
pub async fn run_agent(config_path: PathBuf) -> Result<()> {
    let cfg = Config::load(&config_path)?;
    info!(
        config = %config_path.display(),
        log_file = %cfg.watch.log_file,
        target = %cfg.sync.target_addr,
        "Starting sortie-agent"
    );

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received; shutting down");
                cancel.cancel();
            }
        });
    }

    let cursor = Arc::new(Mutex::new(
        CursorStore::load(Path::new(&cfg.watch.cursor_path))
            .context("opening the cursor store")?,
    ));
    let pending = Arc::new(AtomicUsize::new(0));

    let sync_client = SyncClient::spawn(
        cfg.sync.clone(),
        SyncShared {
            cursor: cursor.clone(),
            log_file: PathBuf::from(&cfg.watch.log_file),
            pending: pending.clone(),
            codecs: Arc::new(CodecRegistry::standard()),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            cancel: cancel.clone(),
        },
    )?;

    let pipeline = Pipeline::new(
        &cfg.watch,
        &cfg.parser,
        cursor,
        sync_client.handle(),
        pending,
        cancel.clone(),
    )
    .await?;

    let pipeline_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run().await {
                error!(error = %e, "Pipeline failed; stopping the agent");
                cancel.cancel();
            }
        })
    };

    if cfg.control.interactive {
        let registry = standard_registry();
        run_dispatch_loop(&registry, &cancel).await;
    } else {
        cancel.cancelled().await;
    }

    // Stop reading, then flush whatever the parser already emitted. The
    // drain is bounded; anything unsent replays from the cursor next run.
    cancel.cancel();
    let _ = pipeline_handle.await;
    sync_client
        .shutdown(Duration::from_millis(cfg.sync.drain_timeout_ms))
        .await;

    info!("sortie-agent stopped");
    Ok(())
}
