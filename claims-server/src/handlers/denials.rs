//! Appeal workflow endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use claims_engine::{AppealOutcome, ClaimDenial, DenialOutcome};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{api_success, ApiResult};
use crate::middleware::ActorId;
use crate::server::ClaimsServer;

#[derive(Debug, Deserialize)]
pub struct ResolveAppealRequest {
    pub outcome: AppealOutcome,
    pub notes: Option<String>,
}

pub async fn get_denial(
    State(server): State<ClaimsServer>,
    Path(denial_id): Path<Uuid>,
) -> ApiResult<ClaimDenial> {
    Ok(api_success(server.claims.get_denial(denial_id).await?))
}

pub async fn file_appeal(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(denial_id): Path<Uuid>,
) -> ApiResult<DenialOutcome> {
    Ok(api_success(server.claims.file_appeal(denial_id, &actor).await?))
}

pub async fn begin_review(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(denial_id): Path<Uuid>,
) -> ApiResult<DenialOutcome> {
    let outcome = server.claims.begin_appeal_review(denial_id, &actor).await?;
    Ok(api_success(outcome))
}

pub async fn resolve_appeal(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(denial_id): Path<Uuid>,
    Json(request): Json<ResolveAppealRequest>,
) -> ApiResult<DenialOutcome> {
    let outcome = server
        .claims
        .resolve_appeal(denial_id, request.outcome, request.notes, &actor)
        .await?;
    Ok(api_success(outcome))
}
