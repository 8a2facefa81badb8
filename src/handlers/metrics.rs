//! Metrics endpoint handler for Prometheus scraping.
//!
//! Encodes the registry in Prometheus text format. A scrape during an
//! in-flight collection cycle reads whatever values were last published,
//! so the output is eventually consistent, never cycle-atomic.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 16 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<SharedState>) -> Result<String, MetricsError> {
    debug!("Processing metrics request");

    let families = state.registry.gather();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    let encoder = TextEncoder::new();

    if encoder.encode(&families, &mut buffer).is_err() {
        error!("Failed to encode Prometheus metrics");
        return Err(MetricsError::EncodingFailed);
    }

    String::from_utf8(buffer).map_err(|_| MetricsError::EncodingFailed)
}
