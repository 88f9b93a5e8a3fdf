//! Console configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (GRID_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use grid_transport::HubConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device whose channel the console connects to.
    #[serde(default = "default_device")]
    pub device: String,

    /// Message tags printed as they arrive.
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Whether to subscribe as soon as the console starts.
    #[serde(default = "default_true")]
    pub auto_listen: bool,

    /// In-process hub settings.
    #[serde(default)]
    pub hub: HubConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_device() -> String {
    std::env::var("GRID_DEVICE").unwrap_or_else(|_| "1".to_string())
}

fn default_tags() -> Vec<String> {
    vec!["data".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    std::env::var("GRID_METRICS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9090)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: default_device(),
            tags: default_tags(),
            auto_listen: true,
            hub: HubConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `GRID_CONFIG`, a default path, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("GRID_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        let config_paths = [
            "grid.toml",
            "/etc/grid/grid.toml",
            "~/.config/grid/grid.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
