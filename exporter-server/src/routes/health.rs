use axum::http::StatusCode;

/// `GET /healthz`
///
/// Liveness only: answers `Ok` whether or not the daemon stream is up.
pub async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Ok")
}
