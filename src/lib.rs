//! Change-notification fan-out for the recipe app, built with Rust.
//!
//! API servers announce committed mutations through an [`EventPublisher`],
//! usually via the emit-after-response [`middleware`];
//! the relay subscribes to those Redis channels and rebroadcasts each message
//! as a `dataChanged` WebSocket frame to every client; a [`RelayClient`]
//! multiplexes those frames to local callbacks. Notifications are
//! refetch hints: best effort, never authoritative.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;

pub use client::{ClientConfig, RelayClient};
pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::publisher::EventPublisher;
pub use services::relay::Relay;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use handlers::http;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the relay router (ws, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let cors = cors_layer(&state.allowed_origin);
    axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin.trim().trim_end_matches('/')) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "unusable CORS origin, allowing none");
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
}
