//! Application state management for the exporter.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers and used by the background collection task.

use std::sync::Arc;
use std::time::Instant;

use prometheus::Registry;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::metrics::ExporterTelemetry;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Outcome of the most recent collection cycle, for the /health endpoint.
#[derive(Clone, Default)]
pub struct CycleStatus {
    pub last_finished: Option<Instant>,
    pub last_duration_seconds: f64,
    pub last_success: bool,
    pub vms_listed: usize,
    pub vms_published: usize,
    pub cycles_total: u64,
}

/// Global application state shared across requests and the collector task.
///
/// The per-VM gauges themselves are owned by the collector; handlers only
/// ever see them through the registry.
pub struct AppState {
    pub registry: Registry,
    pub telemetry: ExporterTelemetry,
    pub cycle: RwLock<CycleStatus>,
    pub config: Arc<Config>,
}
