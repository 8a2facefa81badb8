//! Error taxonomy for the collection pipeline.
//!
//! Only `Configuration` is fatal (startup, missing clock-tick constant).
//! `Discovery` aborts a single collection cycle; `Metadata` and `Accounting`
//! skip a single VM for the current cycle. None of these are ever surfaced
//! through the metrics endpoint.

use thiserror::Error;

/// Failures raised by the VM discovery and sampling pipeline.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Startup-only: the host environment cannot support sampling at all.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// VM enumeration is unavailable; the whole cycle is abandoned.
    #[error("vm discovery failed: {0}")]
    Discovery(String),

    /// A per-VM metadata lookup (vCPU count, host PID) failed.
    #[error("vm metadata lookup failed: {0}")]
    Metadata(String),

    /// A snapshot read (per-task ticks or host iowait) failed.
    #[error("cpu accounting read failed: {0}")]
    Accounting(String),
}

impl CollectError {
    /// Short category tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Configuration(_) => "configuration",
            CollectError::Discovery(_) => "discovery",
            CollectError::Metadata(_) => "metadata",
            CollectError::Accounting(_) => "accounting",
        }
    }
}
