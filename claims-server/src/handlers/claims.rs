//! Claim lifecycle, payment and history endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use claims_engine::{
    ChainVerification, Claim, ClaimDenial, ClaimFilter, ClaimLineItem, DenialOutcome,
    DenialRequest, DiagnosisUpdate, IngestOutcome, NewClaim, NewLineItem, PayerResponse,
    PaymentPosting, PaymentRequest, PostingOutcome, ReconciliationReport, SecondaryPayerInfo,
    SubmissionMethod, VoidOutcome, WorkflowHistoryEntry,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{api_list, api_success, ApiResult};
use crate::middleware::ActorId;
use crate::server::ClaimsServer;

#[derive(Debug, Default, Deserialize)]
pub struct SubmitClaimRequest {
    pub method: Option<SubmissionMethod>,
}

/// Free-text reason or note attached to an operator action
#[derive(Debug, Default, Deserialize)]
pub struct ActionNotes {
    #[serde(alias = "reason")]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LineItemAdded {
    pub claim: Claim,
    pub line_item: ClaimLineItem,
}

pub async fn create_claim(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Json(request): Json<NewClaim>,
) -> ApiResult<Claim> {
    let claim = server.claims.create_claim(request, &actor).await?;
    Ok(api_success(claim))
}

pub async fn list_claims(
    State(server): State<ClaimsServer>,
    Query(filter): Query<ClaimFilter>,
) -> ApiResult<Vec<Claim>> {
    let claims = server.claims.list_claims(&filter).await?;
    Ok(api_list(claims))
}

pub async fn get_claim(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Claim> {
    Ok(api_success(server.claims.get_claim(claim_id).await?))
}

pub async fn add_line_item(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    Json(request): Json<NewLineItem>,
) -> ApiResult<LineItemAdded> {
    let (claim, line_item) = server
        .claims
        .add_line_item(claim_id, request, &actor)
        .await?;
    Ok(api_success(LineItemAdded { claim, line_item }))
}

pub async fn update_diagnoses(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    Json(update): Json<DiagnosisUpdate>,
) -> ApiResult<Claim> {
    let claim = server
        .claims
        .update_diagnoses(claim_id, update, &actor)
        .await?;
    Ok(api_success(claim))
}

pub async fn mark_ready(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Claim> {
    let claim = server.claims.mark_ready_to_submit(claim_id, &actor).await?;
    Ok(api_success(claim))
}

pub async fn submit_claim(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    body: Option<Json<SubmitClaimRequest>>,
) -> ApiResult<Claim> {
    let method = body.and_then(|Json(request)| request.method);
    let claim = server.claims.submit_claim(claim_id, method, &actor).await?;
    Ok(api_success(claim))
}

pub async fn ingest_response(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    Json(response): Json<PayerResponse>,
) -> ApiResult<IngestOutcome> {
    let outcome = server
        .claims
        .ingest_payer_response(claim_id, response, &actor)
        .await?;
    Ok(api_success(outcome))
}

pub async fn post_payment(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    Json(request): Json<PaymentRequest>,
) -> ApiResult<PostingOutcome> {
    let outcome = server.claims.post_payment(claim_id, request, &actor).await?;
    Ok(api_success(outcome))
}

pub async fn list_payments(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Vec<PaymentPosting>> {
    Ok(api_list(server.claims.list_postings(claim_id).await?))
}

pub async fn record_denial(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    Json(request): Json<DenialRequest>,
) -> ApiResult<DenialOutcome> {
    let outcome = server
        .claims
        .record_denial(claim_id, request, &actor)
        .await?;
    Ok(api_success(outcome))
}

pub async fn list_denials(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Vec<ClaimDenial>> {
    Ok(api_list(server.claims.list_denials(claim_id).await?))
}

pub async fn correct_claim(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    body: Option<Json<ActionNotes>>,
) -> ApiResult<Claim> {
    let notes = body.and_then(|Json(b)| b.notes);
    let claim = server
        .claims
        .correct_rejected_claim(claim_id, notes, &actor)
        .await?;
    Ok(api_success(claim))
}

pub async fn cancel_claim(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    body: Option<Json<ActionNotes>>,
) -> ApiResult<Claim> {
    let reason = body.and_then(|Json(b)| b.notes);
    let claim = server.claims.cancel_claim(claim_id, reason, &actor).await?;
    Ok(api_success(claim))
}

pub async fn void_claim(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    body: Option<Json<ActionNotes>>,
) -> ApiResult<VoidOutcome> {
    let reason = body.and_then(|Json(b)| b.notes);
    let outcome = server.claims.void_claim(claim_id, reason, &actor).await?;
    Ok(api_success(outcome))
}

pub async fn close_claim(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    body: Option<Json<ActionNotes>>,
) -> ApiResult<Claim> {
    let notes = body.and_then(|Json(b)| b.notes);
    let claim = server.claims.close_claim(claim_id, notes, &actor).await?;
    Ok(api_success(claim))
}

pub async fn derive_secondary(
    State(server): State<ClaimsServer>,
    ActorId(actor): ActorId,
    Path(claim_id): Path<Uuid>,
    Json(info): Json<SecondaryPayerInfo>,
) -> ApiResult<Claim> {
    let claim = server
        .claims
        .derive_secondary_claim(claim_id, info, &actor)
        .await?;
    Ok(api_success(claim))
}

pub async fn derived_claims(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Vec<Claim>> {
    Ok(api_list(server.claims.derived_claims(claim_id).await?))
}

pub async fn reconciliation(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Vec<ReconciliationReport>> {
    Ok(api_list(server.claims.reconcile_claim(claim_id).await?))
}

pub async fn claim_history(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<Vec<WorkflowHistoryEntry>> {
    Ok(api_list(server.claims.claim_history(claim_id).await?))
}

pub async fn verify_history(
    State(server): State<ClaimsServer>,
    Path(claim_id): Path<Uuid>,
) -> ApiResult<ChainVerification> {
    Ok(api_success(server.claims.verify_history(claim_id).await?))
}
