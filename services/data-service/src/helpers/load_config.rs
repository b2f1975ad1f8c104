// External crates
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: String,
}

impl ServiceConfig {
    /// Load and parse the service configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file at {:?}", path_ref))?;
        let config: ServiceConfig = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse TOML from {:?}", path_ref))?;

        Ok(config)
    }
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
            [server]
            listen_addr = "127.0.0.1:8640"

            [storage]
            db_path = "/var/lib/sortie/records.db"
            "#
        )
        .unwrap();

        let cfg = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(cfg.server.listen_addr, "127.0.0.1:8640");
        assert_eq!(cfg.storage.db_path, "/var/lib/sortie/records.db");
    }
}
