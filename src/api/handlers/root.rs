use axum::response::IntoResponse;

// Undocumented root: a fingerprint for humans poking at the service.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
