//! HTTP endpoint handlers for the exporter.
//!
//! This module provides handlers for all HTTP endpoints:
//! - configurable metrics path: Prometheus metrics endpoint
//! - `/health`: Health check endpoint
//! - `/`: Landing page

pub mod health;
pub mod index;
pub mod metrics;

// Re-export handlers
pub use health::health_handler;
pub use index::index_handler;
pub use metrics::metrics_handler;
