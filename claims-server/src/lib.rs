//! Claims Server - HTTP surface of the claims engine
//!
//! Exposes claim lifecycle, payment posting, denial and appeal, COB and
//! reporting operations as a JSON API. Caller identity arrives in the
//! `X-Actor-Id` header from the gateway in front of this service.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

// Re-export commonly used types
pub use crate::config::ServerConfig;
pub use error::*;
pub use server::ClaimsServer;

use axum::{middleware::from_fn, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the main application router with all routes and middleware
pub fn create_app(server: ClaimsServer) -> Router {
    routes::create_routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::create_cors_layer())
                .layer(from_fn(middleware::request_timing_middleware)),
        )
        .with_state(server)
}
