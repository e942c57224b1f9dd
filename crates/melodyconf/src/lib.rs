//! Configuration loading for MelodyCraft.
//!
//! Files are loaded in order, later files winning key by key:
//! 1. `/etc/melodycraft/config.toml` (system)
//! 2. `~/.config/melodycraft/config.toml` (user)
//! 3. `./melodycraft.toml`, or an explicit path (local override)
//! 4. Environment variables (`MELODYCRAFT_*`, `RUST_LOG`)
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:8000"
//!
//! [proxy]
//! http_port = 3000
//!
//! [client]
//! endpoint = "http://localhost:3000/api/generate"
//! measures_per_line = 4
//!
//! [media]
//! soundfont_dirs = ["~/midi/SF2", "/usr/share/sounds/sf2"]
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{BackendConfig, ClientConfig, MediaConfig, ProxyConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MelodyConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl MelodyConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Like [`load`](Self::load), with `config_path` replacing `./melodycraft.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        loader::load_files(&files, |name| std::env::var(name).ok())
    }

    pub fn to_toml(&self) -> String {
        let body = toml::to_string_pretty(self).unwrap_or_default();
        format!("# MelodyCraft Configuration\n\n{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_setup() {
        let config = MelodyConfig::default();
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.proxy.http_port, 3000);
        assert_eq!(config.client.endpoint, "http://localhost:3000/api/generate");
        assert_eq!(config.client.measures_per_line, 4);
        assert_eq!(config.media.sample_rate, 44_100);
        assert_eq!(config.telemetry.otlp_endpoint, None);
    }

    #[test]
    fn to_toml_round_trips() {
        let config = MelodyConfig::default();
        let text = config.to_toml();
        assert!(text.contains("[client]"));
        let back: MelodyConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
