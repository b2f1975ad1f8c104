// External crates
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::instrument;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub watch: WatchConfig,
    pub parser: ParserConfig,
    pub sync: SyncConfig,
    pub control: ControlConfig,
}

impl Config {
    /// Load and parse the agent configuration file.
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file at {:?}", path_ref))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse TOML from {:?}", path_ref))?;

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            "Agent configuration file loaded"
        );
        Ok(config)
    }
}

/// Which file to tail and where the resume cursor lives.
#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub log_file: String,
    pub cursor_path: String,
    /// Fallback poll interval when no filesystem event arrives.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    /// Consecutive unparsable lines tolerated before the session stops.
    pub error_threshold: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Base URL of the data service, e.g. `http://127.0.0.1:8640`.
    pub target_addr: String,
    pub send_timeout_ms: u64,
    pub max_send_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub retry_jitter: f64,
    pub queue_capacity: usize,
    /// How long the exit path waits for queued records to flush.
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    /// Read administrative commands from stdin. Disable for headless runs.
    pub interactive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn loads_a_complete_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [watch]
            log_file = "/tmp/client.log"
            cursor_path = "/tmp/cursor.json"
            poll_interval_ms = 500

            [parser]
            error_threshold = 25

            [sync]
            target_addr = "http://127.0.0.1:8640"
            send_timeout_ms = 5000
            max_send_attempts = 4
            initial_retry_delay_ms = 200
            max_retry_delay_ms = 5000
            backoff_factor = 2.0
            retry_jitter = 0.2
            queue_capacity = 32
            drain_timeout_ms = 3000

            [control]
            interactive = true
            "#
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.watch.log_file, "/tmp/client.log");
        assert_eq!(cfg.parser.error_threshold, 25);
        assert_eq!(cfg.sync.max_send_attempts, 4);
        assert!(cfg.control.interactive);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/sortie-agent.toml").is_err());
    }
}
