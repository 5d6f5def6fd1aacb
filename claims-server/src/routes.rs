use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{
    handlers::{claims, denials, health, reports},
    server::ClaimsServer,
};

/// Create health check routes
pub fn health_routes() -> Router<ClaimsServer> {
    Router::new().route("/health", get(health::health_check))
}

/// Claim lifecycle, ledger and history routes
pub fn claim_routes() -> Router<ClaimsServer> {
    Router::new()
        .route("/claims", post(claims::create_claim).get(claims::list_claims))
        .route("/claims/:id", get(claims::get_claim))
        .route("/claims/:id/line-items", post(claims::add_line_item))
        .route("/claims/:id/diagnoses", put(claims::update_diagnoses))
        .route("/claims/:id/ready", post(claims::mark_ready))
        .route("/claims/:id/submit", post(claims::submit_claim))
        .route("/claims/:id/responses", post(claims::ingest_response))
        .route(
            "/claims/:id/payments",
            post(claims::post_payment).get(claims::list_payments),
        )
        .route(
            "/claims/:id/denials",
            post(claims::record_denial).get(claims::list_denials),
        )
        .route("/claims/:id/correct", post(claims::correct_claim))
        .route("/claims/:id/cancel", post(claims::cancel_claim))
        .route("/claims/:id/void", post(claims::void_claim))
        .route("/claims/:id/close", post(claims::close_claim))
        .route("/claims/:id/secondary", post(claims::derive_secondary))
        .route("/claims/:id/derived", get(claims::derived_claims))
        .route("/claims/:id/reconciliation", get(claims::reconciliation))
        .route("/claims/:id/history", get(claims::claim_history))
        .route("/claims/:id/history/verify", get(claims::verify_history))
}

/// Appeal workflow routes
pub fn denial_routes() -> Router<ClaimsServer> {
    Router::new()
        .route("/denials/:id", get(denials::get_denial))
        .route("/denials/:id/appeal", post(denials::file_appeal))
        .route("/denials/:id/review", post(denials::begin_review))
        .route("/denials/:id/resolve", post(denials::resolve_appeal))
}

/// Reporting routes
pub fn report_routes() -> Router<ClaimsServer> {
    Router::new()
        .route("/reports/summary", get(reports::claims_summary))
        .route("/reports/stale-submissions", get(reports::stale_submissions))
        .route(
            "/reports/secondary-candidates",
            get(reports::secondary_candidates),
        )
        .route("/reports/discrepancies", get(reports::discrepancies))
}

/// Create API v1 routes
pub fn api_v1_routes() -> Router<ClaimsServer> {
    Router::new()
        .merge(claim_routes())
        .merge(denial_routes())
        .merge(report_routes())
}

/// Create all application routes
pub fn create_routes() -> Router<ClaimsServer> {
    Router::new()
        .merge(health_routes())
        .nest("/api/v1", api_v1_routes())
}
