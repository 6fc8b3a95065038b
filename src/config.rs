//! Configuration for the store and the sync server
//!
//! Loaded from a JSON file, then overridden by `ARBOR_*` environment
//! variables, then by command line flags.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listen port for the sync server
pub const DEFAULT_PORT: u16 = 8575;

/// Default listen host for the sync server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// File name used when no database path is configured
pub const DEFAULT_DB_FILE: &str = "store.arbor";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the database file
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: default_db_path(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Close a connection that sends nothing for this many seconds.
    /// `None` keeps idle connections open indefinitely.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Largest accepted message in bytes; `None` is unlimited
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout_secs: None,
            max_message_size: None,
        }
    }
}

impl ServerConfig {
    /// `host:port` suitable for binding a listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load a config file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Write this config as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ARBOR_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(host) = lookup("ARBOR_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ARBOR_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| Error::Config(format!("ARBOR_PORT is not a port: {}", port)))?;
        }
        if let Some(secs) = lookup("ARBOR_IDLE_TIMEOUT_SECS") {
            self.server.idle_timeout_secs = match secs.as_str() {
                "" | "none" => None,
                _ => Some(secs.parse().map_err(|_| {
                    Error::Config(format!("ARBOR_IDLE_TIMEOUT_SECS is not a number: {}", secs))
                })?),
            };
        }
        Ok(())
    }
}

/// `<data dir>/arbor/store.arbor`, or `store.arbor` in the working directory
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("arbor").join(DEFAULT_DB_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

/// `<config dir>/arbor/config.json`, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("arbor").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr(), "127.0.0.1:8575");
        assert_eq!(config.server.idle_timeout(), None);
        assert_eq!(config.server.max_message_size, None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.store.path = dir.path().join("db.arbor");
        config.server.idle_timeout_secs = Some(30);
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"server":{"host":"0.0.0.0","port":9000}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr(), "0.0.0.0:9000");
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ARBOR_DB_PATH", "/tmp/x.arbor"),
            ("ARBOR_PORT", "9100"),
            ("ARBOR_IDLE_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/x.arbor"));
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.idle_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.server.host, DEFAULT_HOST);
    }

    #[test]
    fn test_bad_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|name| (name == "ARBOR_PORT").then(|| "abc".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
