use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::server::ClaimsServer;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime: u64,
    pub environment: String,
}

/// Health check handler
pub async fn health_check(State(server): State<ClaimsServer>) -> Json<HealthResponse> {
    let environment = if server.config.is_production() {
        "production"
    } else {
        "development"
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: server.uptime_seconds(),
        environment: environment.to_string(),
    })
}
