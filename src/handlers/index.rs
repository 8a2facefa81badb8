//! Landing page handler.
//!
//! Serves a minimal HTML page at `/` linking to the metrics endpoint.

use axum::{extract::State, response::Html};
use tracing::{debug, instrument};

use crate::config::DEFAULT_METRICS_PATH;
use crate::state::SharedState;

/// Handler for the landing page.
#[instrument(skip(state))]
pub async fn index_handler(State(state): State<SharedState>) -> Html<String> {
    debug!("Processing landing page request");

    let metrics_path = state
        .config
        .metrics_path
        .as_deref()
        .unwrap_or(DEFAULT_METRICS_PATH);

    Html(format!(
        r#"<html>
    <head><title>VM CPU Exporter</title></head>
    <body>
    <h1>VM CPU Exporter</h1>
    <p><a href="{metrics_path}">Metrics</a></p>
    </body>
    </html>"#
    ))
}
