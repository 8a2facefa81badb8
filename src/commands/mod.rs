//! CLI command implementations for kvirt-cpu-exporter.
//!
//! This module provides implementations for the CLI subcommands:
//! - `check`: System validation (virsh, /proc accounting sources)
//! - `config`: Configuration file generation

pub mod check;
pub mod config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
