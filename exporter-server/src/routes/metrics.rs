use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use crate::state::SharedState;

/// `GET /metrics`
///
/// Renders the registry in the Prometheus text exposition format.
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, state.registry.content_type())],
        state.registry.snapshot(),
    )
}
