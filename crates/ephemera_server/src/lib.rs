//! HTTP and WebSocket surface for the Ephemera engine.

pub mod config;
pub mod error;
pub mod handlers;
pub mod sweep;

use axum::{Router, routing::get};
use ephemera_core::Runtime;

/// Build the application router (without CORS and tracing layers).
pub fn app_router(runtime: Runtime) -> Router {
    Router::new()
        .route("/", get(|| async { "Ephemera Server" }))
        .route("/health", get(handlers::health).with_state(runtime.clone()))
        .nest("/api", handlers::api_routes(&runtime))
}
