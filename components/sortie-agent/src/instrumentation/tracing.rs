// External crates
use std::panic;
use std::path::Path;
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt,
    prelude::*,
    registry::Registry,
};

/// Install the global tracing subscriber.
///
/// Full-detail output goes to a daily-rolling file under `log_dir`; anything
/// WARN and above is mirrored to stderr so the interactive command surface on
/// stdout stays readable. The returned guard flushes the non-blocking file
/// writer and must be held until process exit.
pub fn init_tracing(log_dir: &Path) -> WorkerGuard {
    let file_appender = rolling::daily(log_dir, "sortie-agent.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_writer)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let stderr_layer = fmt::layer()
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN);

    let subscriber = Registry::default()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .with(ErrorLayer::default());

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global tracing subscriber");

    guard
}

/// Route panics through tracing so they land in the same log as everything
/// else before the process dies.
pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = match panic_info.payload().downcast_ref::<&str>() {
            Some(s) => (*s).to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => s.clone(),
                None => "Unknown panic".to_string(),
            },
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Agent panicked!"
        );
    }));
}
