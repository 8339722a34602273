//! Coordinator configuration, loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Address the HTTP API and observer WebSocket listen on.
    pub listen: SocketAddr,
    /// Capacity of the bounded dispatch queue. Enqueueing fails fast once
    /// this many deliveries are pending.
    pub dispatch_queue_size: usize,
    /// Capacity of the notification bus's outbound queue; frames beyond it
    /// are dropped.
    pub notify_queue_size: usize,

    /// path of the configuration file, if the configuration was loaded from a file
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            dispatch_queue_size: 16,
            notify_queue_size: 100,
            source: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("invalid configuration string")]
    InvalidConfigString(String, #[source] eyre::Report),
    #[error("invalid configuration file {}", .0.display())]
    InvalidConfigFile(PathBuf, #[source] eyre::Report),
    #[error("i/o error reading configuration file {}", .0.display())]
    IoError(PathBuf, std::io::Error),
}

impl Config {
    pub fn parse(s: &str) -> Result<Config, ConfigLoadError> {
        toml::from_str(s).map_err(|e| ConfigLoadError::InvalidConfigString(s.to_owned(), e.into()))
    }

    pub fn parse_file(p: &Path) -> Result<Config, ConfigLoadError> {
        let config_string =
            std::fs::read_to_string(p).map_err(|e| ConfigLoadError::IoError(p.to_owned(), e))?;
        let mut config: Config = toml::from_str(&config_string)
            .map_err(|e| ConfigLoadError::InvalidConfigFile(p.to_owned(), e.into()))?;
        config.source = Some(p.to_owned());
        Ok(config)
    }
}
