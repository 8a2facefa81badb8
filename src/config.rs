//! Configuration loading and merging for kvirt-cpu-exporter.
//!
//! Configuration is resolved in three layers: hard-coded defaults, an
//! optional config file (YAML/JSON/TOML), and CLI flags, with the CLI
//! taking precedence.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::{Args, ConfigFormat};

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9257;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_COLLECT_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_SAMPLE_WINDOW_MS: u64 = 100;

/// Effective exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub bind: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "metrics-path")]
    pub metrics_path: Option<String>,

    // Collection
    #[serde(alias = "collect-interval-secs")]
    pub collect_interval_secs: Option<u64>,
    #[serde(alias = "sample-window-ms")]
    pub sample_window_ms: Option<u64>,
    #[serde(alias = "prune-stale")]
    pub prune_stale: Option<bool>,

    // Feature flags
    #[serde(alias = "enable-health")]
    pub enable_health: Option<bool>,

    // Logging
    #[serde(alias = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            metrics_path: Some(DEFAULT_METRICS_PATH.to_string()),
            collect_interval_secs: Some(DEFAULT_COLLECT_INTERVAL_SECS),
            sample_window_ms: Some(DEFAULT_SAMPLE_WINDOW_MS),
            prune_stale: Some(false),
            enable_health: Some(true),
            log_level: Some("info".into()),
        }
    }
}

/// Validate effective config (used by --check-config and at startup).
pub fn validate_effective_config(cfg: &Config) -> Result<()> {
    if let Some(path) = cfg.metrics_path.as_deref() {
        if !path.starts_with('/') {
            anyhow::bail!("metrics_path '{}' must start with '/'", path);
        }
        if path == "/" {
            anyhow::bail!("metrics_path must not shadow the landing page at '/'");
        }
    }

    if cfg.sample_window_ms == Some(0) {
        anyhow::bail!("sample_window_ms must be at least 1");
    }

    if cfg.collect_interval_secs == Some(0) {
        anyhow::bail!("collect_interval_secs must be at least 1");
    }

    let window_ms = cfg.sample_window_ms.unwrap_or(DEFAULT_SAMPLE_WINDOW_MS);
    let interval_secs = cfg.collect_interval_secs.unwrap_or(DEFAULT_COLLECT_INTERVAL_SECS);
    if window_ms > interval_secs.saturating_mul(1000) {
        anyhow::bail!(
            "sample_window_ms ({}) must not exceed the collection interval ({}s)",
            window_ms,
            interval_secs
        );
    }

    Ok(())
}

/// Configuration loading with multiple format support.
///
/// Tries the explicit path first, then the default locations, and falls
/// back to built-in defaults when no file exists.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = if let Some(p) = path {
        p.to_path_buf()
    } else {
        let defaults = [
            "/etc/kvirt/cpu-exporter.yaml",
            "/etc/kvirt/cpu-exporter.yml",
            "/etc/kvirt/cpu-exporter.json",
            "./kvirt-cpu-exporter.yaml",
            "./kvirt-cpu-exporter.yml",
            "./kvirt-cpu-exporter.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_default()
    };

    if path.as_os_str().is_empty() || !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let config: Config = serde_json::from_str(&content)?;
            info!("Loaded JSON configuration from: {}", path.display());
            Ok(config)
        }
        Some("toml") => {
            let config: Config = toml::from_str(&content)?;
            info!("Loaded TOML configuration from: {}", path.display());
            Ok(config)
        }
        _ => {
            // Default to YAML
            let config: Config = serde_yaml::from_str(&content)?;
            info!("Loaded YAML configuration from: {}", path.display());
            Ok(config)
        }
    }
}

/// Resolves the effective configuration: file layer, then CLI overrides.
pub fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(bind) = args.bind {
        config.bind = Some(bind.to_string());
    }
    if let Some(path) = &args.metrics_path {
        config.metrics_path = Some(path.clone());
    }
    if let Some(secs) = args.collect_interval {
        config.collect_interval_secs = Some(secs);
    }
    if let Some(ms) = args.sample_window_ms {
        config.sample_window_ms = Some(ms);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.prune_stale {
        config.prune_stale = Some(true);
    }

    Ok(config)
}

/// Shows configuration in the requested format.
pub fn show_config(config: &Config, format: ConfigFormat) -> Result<()> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}
