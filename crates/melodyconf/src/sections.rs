//! Config sections. Every field has a serde default so partial files work.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The generation backend the proxy forwards to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Default: http://localhost:8000
    #[serde(default = "BackendConfig::default_base_url")]
    pub base_url: String,

    /// Default: 30000
    #[serde(default = "BackendConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl BackendConfig {
    fn default_base_url() -> String {
        "http://localhost:8000".to_string()
    }

    fn default_timeout_ms() -> u64 {
        30_000
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// The `POST /api/generate` pass-through service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Default: 3000
    #[serde(default = "ProxyConfig::default_http_port")]
    pub http_port: u16,
}

impl ProxyConfig {
    fn default_http_port() -> u16 {
        3000
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
        }
    }
}

/// The client core: where to request generations and how to lay them out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default: http://localhost:3000/api/generate
    #[serde(default = "ClientConfig::default_endpoint")]
    pub endpoint: String,

    /// Default: 60000
    #[serde(default = "ClientConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Bars per display line, shared by reflow and engine layout.
    /// Default: 4
    #[serde(default = "ClientConfig::default_measures_per_line")]
    pub measures_per_line: usize,
}

impl ClientConfig {
    fn default_endpoint() -> String {
        "http://localhost:3000/api/generate".to_string()
    }

    fn default_timeout_ms() -> u64 {
        60_000
    }

    fn default_measures_per_line() -> usize {
        4
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            timeout_ms: Self::default_timeout_ms(),
            measures_per_line: Self::default_measures_per_line(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Searched in order for the first `.sf2`.
    #[serde(default = "MediaConfig::default_soundfont_dirs")]
    pub soundfont_dirs: Vec<PathBuf>,

    /// Default: 44100
    #[serde(default = "MediaConfig::default_sample_rate")]
    pub sample_rate: u32,
}

impl MediaConfig {
    fn default_soundfont_dirs() -> Vec<PathBuf> {
        vec![
            PathBuf::from("~/midi/SF2"),
            PathBuf::from("/usr/share/sounds/sf2"),
            PathBuf::from("/usr/share/soundfonts"),
        ]
    }

    fn default_sample_rate() -> u32 {
        44_100
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            soundfont_dirs: Self::default_soundfont_dirs(),
            sample_rate: Self::default_sample_rate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive (trace, debug, info, warn, error or a full
    /// `EnvFilter` string). Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Unset means console logging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}
