mod cli;
mod commands;
mod cursor;
mod helpers;
mod instrumentation;
mod metrics;
mod parser;
mod runtime;
mod sync;
mod tailer;
mod watcher;

use anyhow::Result;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    // The appender guard must outlive the runtime or buffered log lines are
    // dropped on exit.
    let _guard = instrumentation::tracing::init_tracing(Path::new("logs"));
    instrumentation::tracing::init_panic_handler();

    // Main entrypoint simply delegates control to the CLI layer.
    cli::cli::run().await
}
