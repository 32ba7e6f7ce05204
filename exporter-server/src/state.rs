//! Shared application state for the HTTP handlers.

use std::sync::Arc;

use exporter::MetricsRegistry;

/// State handed to request handlers via Axum's `State` extractor.
pub struct AppState {
    /// Registry the dispatcher writes into and `/metrics` reads from.
    pub registry: MetricsRegistry,
}

/// Thread-safe alias for `AppState`.
pub type SharedState = Arc<AppState>;
