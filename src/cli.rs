//! CLI arguments and subcommands for kvirt-cpu-exporter.
//!
//! This module defines the command-line interface structure using the clap
//! library, including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "kvirt-cpu-exporter",
    about = "Prometheus exporter for per-VM CPU utilization on libvirt/QEMU hosts",
    long_about = "Prometheus exporter for per-VM CPU utilization on libvirt/QEMU hosts.\n\n\
                  Samples per-thread CPU accounting of each VM's QEMU process over a short \
                  window and publishes user, system and iowait percentages normalized by \
                  the VM's configured vCPU count.",
    author = "Michael Moll <kvirt-cpu@herakles.io> - Herakles IO",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Path under which to expose metrics
    #[arg(long)]
    pub metrics_path: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Seconds between collection cycles
    #[arg(long)]
    pub collect_interval: Option<u64>,

    /// Sampling window between the two snapshots of a cycle, in milliseconds
    #[arg(long)]
    pub sample_window_ms: Option<u64>,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Evict gauge labels of VMs unseen in the current cycle
    #[arg(long)]
    pub prune_stale: bool,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate system requirements (virsh, /proc accounting)
    Check {
        /// Check virsh availability
        #[arg(long)]
        virsh: bool,

        /// Check /proc filesystem accounting sources
        #[arg(long)]
        proc: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate a configuration file with defaults
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },
}
