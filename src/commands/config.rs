//! Configuration generation command implementation.
//!
//! Emits a config file in the requested format, pre-filled with the
//! built-in defaults, either to stdout or to a file.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;

use crate::cli::ConfigFormat;
use crate::config::Config;

/// Implements the `config` subcommand.
pub fn command_config(output: Option<PathBuf>, format: ConfigFormat) -> Result<()> {
    let config = Config::default();

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
    };

    match output {
        Some(path) => {
            fs::write(&path, &content)?;
            println!("Configuration written to {}", path.display());
        }
        None => println!("{content}"),
    }

    Ok(())
}
