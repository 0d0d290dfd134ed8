pub mod api;
pub mod ws;

pub use api::api_routes;

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use ephemera_core::Runtime;
use tracing::error;

/// Liveness plus a backing-store probe.
pub async fn health(State(runtime): State<Runtime>) -> impl IntoResponse {
    match runtime.health() {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        }
    }
}
