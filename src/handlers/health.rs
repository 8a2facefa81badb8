//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that reports the
//! outcome of the most recent collection cycle as plain text.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let cycle = state.cycle.read().await.clone();

    // Derive HTTP status from the last cycle outcome
    let status = if cycle.last_success && cycle.last_finished.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let message = if cycle.last_finished.is_none() {
        "No collection cycle completed yet"
    } else if cycle.last_success {
        "OK"
    } else {
        "Last collection cycle abandoned"
    };

    let mut out = String::new();
    writeln!(out, "{message}").ok();
    writeln!(out).ok();
    writeln!(out, "cycles total:        {}", cycle.cycles_total).ok();
    writeln!(out, "vms listed:          {}", cycle.vms_listed).ok();
    writeln!(out, "vms published:       {}", cycle.vms_published).ok();
    writeln!(
        out,
        "last cycle duration: {:.3}s",
        cycle.last_duration_seconds
    )
    .ok();
    if let Some(finished) = cycle.last_finished {
        writeln!(out, "last cycle age:      {:.1}s", finished.elapsed().as_secs_f64()).ok();
    }

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        out,
    )
}
