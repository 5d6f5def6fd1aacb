use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderName, Method},
    middleware::Next,
    response::Response,
};
use claims_engine::Actor;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;

/// Header carrying the caller identity, set by the upstream gateway
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Caller identity of the request. The gateway has already authorised the
/// caller; the engine only records who acted.
#[derive(Debug, Clone)]
pub struct ActorId(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .ok_or_else(|| ApiError::authentication("X-Actor-Id header is required"))?
            .to_str()
            .map_err(|_| ApiError::authentication("X-Actor-Id header is not valid text"))?
            .trim();
        if value.is_empty() {
            return Err(ApiError::authentication("X-Actor-Id header is empty"));
        }
        Ok(ActorId(Actor::new(value)))
    }
}

/// Request timing middleware
pub async fn request_timing_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let actor = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        actor = %actor,
        duration_ms = start.elapsed().as_millis(),
        status = response.status().as_u16(),
        "Request processed"
    );

    response
}

pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(ACTOR_HEADER),
        ])
}
