//! Real-time event layer for the agent dashboard.
//!
//! Server side: a relay that keeps one SSE stream per signed-in user and
//! accepts signed triggers from the REST backend. Client side: a push channel
//! that republishes envelopes into a local registry, the views folded from it,
//! and the classification pipeline that produces `messageCategorized`.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod views;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::channel::EventChannel;
pub use services::hub::EventHub;

use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the relay router (events, triggers, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/api/events", get(handlers::events_handler))
        .route("/api/broadcast", post(handlers::broadcast))
        .route("/api/classify", post(handlers::classify))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}
