//! HTTP routes served by the exporter.

pub mod health;
pub mod metrics;

use axum::{Router, routing::get};

use crate::state::SharedState;

/// Builds the scrape router. Paths other than these answer 404.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
