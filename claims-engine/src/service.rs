//! Claims service: the public operations of the engine.
//!
//! Mutations of one claim are serialised in-process by a per-claim async
//! lock and across processes by the repository's version check. A mutation
//! that loses the version race is replayed from a fresh read up to
//! `max_conflict_retries` times. Reads never take the lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use logger_redacted::{PiiRedactor, RedactionConfig};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cob::{self, ReconciliationDiscrepancy, ReconciliationReport, SecondaryPayerInfo};
use crate::config::ClaimsConfig;
use crate::denial::{self, AppealOutcome, ClaimDenial, DenialCategory, DenialRequest};
use crate::error::{ClaimsError, ClaimsResult, Violation};
use crate::history::{verify_chain, ChainVerification, ClaimAction, GENESIS_HASH};
use crate::lifecycle::{check_submittable, ensure_transition, validate_diagnoses};
use crate::models::*;
use crate::monitor::{self, SecondaryCandidate, StaleSubmission};
use crate::payment::{self, PaymentPosting, PaymentRequest};
use crate::reporting::{self, ClaimsSummary};
use crate::repository::ClaimRepository;
use crate::transaction::ClaimTransaction;
use crate::transport::{ClaimTransport, PayerResponse, ResponseKind};

#[derive(Debug, Clone, Serialize)]
pub struct PostingOutcome {
    pub claim: Claim,
    pub posting: PaymentPosting,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialOutcome {
    pub claim: Claim,
    pub denial: ClaimDenial,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoidOutcome {
    pub claim: Claim,
    pub reversal: Option<PaymentPosting>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub claim: Claim,
    pub kind: ResponseKind,
    /// The response was already applied; nothing changed
    pub duplicate: bool,
    pub posting: Option<PaymentPosting>,
    pub denials: Vec<ClaimDenial>,
}

/// Claims adjudication and reconciliation service
pub struct ClaimsService {
    repository: Arc<dyn ClaimRepository>,
    transport: Arc<dyn ClaimTransport>,
    config: ClaimsConfig,
    redactor: PiiRedactor,
    claim_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ClaimsService {
    pub fn new(
        repository: Arc<dyn ClaimRepository>,
        transport: Arc<dyn ClaimTransport>,
        config: ClaimsConfig,
    ) -> ClaimsResult<Self> {
        let redactor = PiiRedactor::new(RedactionConfig::default())
            .map_err(|e| ClaimsError::Configuration(e.to_string()))?;
        Ok(Self {
            repository,
            transport,
            config,
            redactor,
            claim_locks: DashMap::new(),
        })
    }

    /// Replace the redactor applied to payer free text before it is logged.
    pub fn with_redactor(mut self, redactor: PiiRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn config(&self) -> &ClaimsConfig {
        &self.config
    }

    async fn lock_claim(&self, claim_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .claim_locks
            .entry(claim_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    async fn load_claim(&self, claim_id: Uuid) -> ClaimsResult<Claim> {
        self.repository
            .get_claim(claim_id)
            .await?
            .ok_or_else(|| ClaimsError::claim_not_found(claim_id))
    }

    fn log_rejection(&self, operation: &str, claim_id: Uuid, err: &ClaimsError) {
        match err {
            ClaimsError::Validation(_) | ClaimsError::NotFound { .. } => warn!(
                claim_id = %claim_id,
                operation,
                code = err.code(),
                reason = %self.redactor.redact(&err.to_string()),
                "Claim operation rejected"
            ),
            _ => error!(
                claim_id = %claim_id,
                operation,
                code = err.code(),
                error = %err,
                "Claim operation failed"
            ),
        }
    }

    async fn mutate<T, F>(
        &self,
        claim_id: Uuid,
        actor: &Actor,
        operation: &'static str,
        apply: F,
    ) -> ClaimsResult<(Claim, T)>
    where
        F: FnMut(&mut ClaimTransaction, &[PaymentPosting]) -> ClaimsResult<T> + Send,
        T: Send,
    {
        let _guard = self.lock_claim(claim_id).await;
        self.mutate_locked(claim_id, actor, operation, apply).await
    }

    /// Run one mutation against a fresh read of the claim. The caller must
    /// hold the claim lock.
    async fn mutate_locked<T, F>(
        &self,
        claim_id: Uuid,
        actor: &Actor,
        operation: &'static str,
        mut apply: F,
    ) -> ClaimsResult<(Claim, T)>
    where
        F: FnMut(&mut ClaimTransaction, &[PaymentPosting]) -> ClaimsResult<T> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let claim = self.load_claim(claim_id).await?;
            let denials = self.repository.list_denials(claim_id).await?;
            let postings = self.repository.list_postings(claim_id).await?;
            let previous = claim.status;

            let mut tx = ClaimTransaction::begin(claim, denials, actor.clone());
            let output = match apply(&mut tx, &postings) {
                Ok(output) => output,
                Err(err) => {
                    self.log_rejection(operation, claim_id, &err);
                    return Err(err);
                }
            };
            if tx.is_noop() {
                return Ok((tx.claim().clone(), output));
            }
            let commit = tx.into_commit().map_err(|violation| {
                let err = ClaimsError::from(violation);
                self.log_rejection(operation, claim_id, &err);
                err
            })?;
            let committed = commit.claim.clone();

            match self.repository.commit(commit).await {
                Ok(()) => {
                    info!(
                        claim_id = %claim_id,
                        operation,
                        from = %previous,
                        to = %committed.status,
                        version = committed.version,
                        actor = %actor,
                        "Claim updated"
                    );
                    self.after_settlement(previous, &committed).await;
                    return Ok((committed, output));
                }
                Err(ClaimsError::Conflict { .. }) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(claim_id = %claim_id, operation, attempt, "Version conflict, replaying mutation");
                }
                Err(err) => {
                    self.log_rejection(operation, claim_id, &err);
                    return Err(err);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Claim lifecycle
    // ------------------------------------------------------------------

    /// Open a new draft claim.
    pub async fn create_claim(&self, request: NewClaim, actor: &Actor) -> ClaimsResult<Claim> {
        if request.patient_ref.trim().is_empty() {
            return Err(Violation::MissingField {
                field: "patient_ref",
            }
            .into());
        }
        if request.payer.payer_id.trim().is_empty() {
            return Err(Violation::MissingField { field: "payer_id" }.into());
        }
        if request.payer.member_id.trim().is_empty() {
            return Err(Violation::MissingField { field: "member_id" }.into());
        }
        if let (Some(start), Some(end)) = (request.service_date_start, request.service_date_end) {
            if end < start {
                return Err(Violation::ServiceDatesReversed { start, end }.into());
            }
        }
        let (diagnosis_codes, principal_diagnosis) = validate_diagnoses(
            &request.diagnoses,
            request.principal_diagnosis.as_deref(),
            self.config.max_diagnosis_codes,
        )?;

        let now = Utc::now();
        let claim = Claim {
            id: Uuid::new_v4(),
            claim_number: None,
            version: 0,
            patient_ref: request.patient_ref.trim().to_string(),
            visit_ref: request.visit_ref,
            rendering_provider_ref: request.rendering_provider_ref,
            billing_provider_ref: request.billing_provider_ref,
            facility_ref: request.facility_ref,
            payer: request.payer,
            claim_type: request.claim_type,
            place_of_service_code: request.place_of_service_code,
            service_date_start: request.service_date_start,
            service_date_end: request.service_date_end,
            diagnosis_codes,
            principal_diagnosis,
            line_items: Vec::new(),
            financials: FinancialSummary::default(),
            status: ClaimStatus::Draft,
            submission_attempts: 0,
            submission: None,
            payer_response: None,
            payment: None,
            denial: None,
            cob: None,
            ingested_responses: Vec::new(),
            history_sequence: 0,
            history_head: GENESIS_HASH.to_string(),
            notes: request.notes,
            audit: AuditStamp {
                created_by: actor.clone(),
                created_at: now,
                updated_by: actor.clone(),
                updated_at: now,
            },
        };

        let commit = ClaimTransaction::create(claim, actor.clone(), None).into_commit()?;
        let created = commit.claim.clone();
        self.repository.commit(commit).await?;
        info!(
            claim_id = %created.id,
            payer_id = %created.payer.payer_id,
            rank = %created.payer.rank,
            actor = %actor,
            "Claim created"
        );
        Ok(created)
    }

    pub async fn add_line_item(
        &self,
        claim_id: Uuid,
        request: NewLineItem,
        actor: &Actor,
    ) -> ClaimsResult<(Claim, ClaimLineItem)> {
        self.mutate(claim_id, actor, "add line item", |tx, _| {
            let now = tx.now();
            let line = tx.claim_mut().add_line_item(&request, now)?.clone();
            tx.record(
                ClaimAction::LineItemAdded,
                None,
                json!({
                    "line_item_id": line.id,
                    "line_number": line.line_number,
                    "line_total": line.line_total,
                }),
            );
            Ok(line)
        })
        .await
    }

    pub async fn update_diagnoses(
        &self,
        claim_id: Uuid,
        update: DiagnosisUpdate,
        actor: &Actor,
    ) -> ClaimsResult<Claim> {
        let max = self.config.max_diagnosis_codes;
        let (claim, ()) = self
            .mutate(claim_id, actor, "update diagnoses", |tx, _| {
                let status = tx.status();
                if !status.is_editable() {
                    return Err(Violation::ClaimNotEditable { status }.into());
                }
                let (codes, principal) =
                    validate_diagnoses(&update.codes, update.principal.as_deref(), max)?;
                for line in &tx.claim().line_items {
                    if let Some(&pointer) = line
                        .diagnosis_pointers
                        .iter()
                        .find(|&&p| usize::from(p) > codes.len())
                    {
                        return Err(Violation::UnresolvedDiagnosisPointer {
                            line_number: line.line_number,
                            pointer,
                        }
                        .into());
                    }
                }
                let count = codes.len();
                let claim = tx.claim_mut();
                claim.diagnosis_codes = codes;
                claim.principal_diagnosis = principal;
                tx.record(
                    ClaimAction::DiagnosesUpdated,
                    None,
                    json!({ "diagnosis_count": count }),
                );
                Ok(())
            })
            .await?;
        Ok(claim)
    }

    pub async fn mark_ready_to_submit(&self, claim_id: Uuid, actor: &Actor) -> ClaimsResult<Claim> {
        let max = self.config.max_diagnosis_codes;
        let (claim, ()) = self
            .mutate(claim_id, actor, "mark ready to submit", |tx, _| {
                ensure_transition(tx.status(), ClaimStatus::ReadyToSubmit)?;
                check_submittable(tx.claim(), max)?;
                tx.transition(
                    ClaimStatus::ReadyToSubmit,
                    ClaimAction::MarkedReady,
                    None,
                    serde_json::Value::Null,
                )?;
                Ok(())
            })
            .await?;
        Ok(claim)
    }

    /// Queue the claim and hand it to the transport. A failed transmission
    /// leaves the claim queued and can be retried by calling again.
    pub async fn submit_claim(
        &self,
        claim_id: Uuid,
        method: Option<SubmissionMethod>,
        actor: &Actor,
    ) -> ClaimsResult<Claim> {
        let method = method.unwrap_or(self.config.default_submission_method);
        let prefix = self.config.claim_number_prefix.clone();
        let _guard = self.lock_claim(claim_id).await;

        let current = self.load_claim(claim_id).await?;
        let queued = if current.status == ClaimStatus::Queued {
            current
        } else {
            self.mutate_locked(claim_id, actor, "queue claim", |tx, _| {
                let status = tx.status();
                if status != ClaimStatus::ReadyToSubmit {
                    return Err(Violation::OperationNotAllowed {
                        operation: "submit",
                        status,
                    }
                    .into());
                }
                let now = tx.now();
                let claim = tx.claim_mut();
                if claim.claim_number.is_none() {
                    claim.claim_number = Some(generate_claim_number(&prefix, now));
                }
                claim.submission_attempts += 1;
                let metadata = json!({
                    "claim_number": claim.claim_number,
                    "attempt": claim.submission_attempts,
                    "method": method,
                });
                tx.transition(ClaimStatus::Queued, ClaimAction::Queued, None, metadata)?;
                Ok(())
            })
            .await?
            .0
        };

        let receipt = match self.transport.transmit(&queued, method).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(
                    claim_id = %claim_id,
                    attempt = queued.submission_attempts,
                    error = %err,
                    "Claim transmission failed, claim remains queued"
                );
                return Err(err.into());
            }
        };

        let (claim, ()) = self
            .mutate_locked(claim_id, actor, "record submission", |tx, _| {
                let submitted_by = tx.actor().clone();
                tx.claim_mut().submission = Some(SubmissionInfo {
                    method,
                    submitted_at: receipt.transmitted_at,
                    submitted_by,
                    payer_control_number: receipt.payer_control_number.clone(),
                });
                tx.transition(
                    ClaimStatus::Submitted,
                    ClaimAction::Submitted,
                    None,
                    json!({
                        "method": method,
                        "payer_control_number": receipt.payer_control_number,
                    }),
                )?;
                Ok(())
            })
            .await?;
        Ok(claim)
    }

    /// Apply an acknowledgement, status or adjudication response from the
    /// payer. Responses already applied are recognised by fingerprint and
    /// ignored; unknown response codes are refused without touching the claim.
    pub async fn ingest_payer_response(
        &self,
        claim_id: Uuid,
        response: PayerResponse,
        actor: &Actor,
    ) -> ClaimsResult<IngestOutcome> {
        let kind = ResponseKind::from_code(&response.response_code).ok_or_else(|| {
            let err = ClaimsError::ExternalDependency {
                service: "payer response".to_string(),
                message: format!(
                    "unrecognised response code '{}'",
                    self.redactor.redact(&response.response_code)
                ),
            };
            self.log_rejection("ingest payer response", claim_id, &err);
            err
        })?;
        let fingerprint = response.fingerprint();
        let _guard = self.lock_claim(claim_id).await;

        let current = self.load_claim(claim_id).await?;
        if current.ingested_responses.contains(&fingerprint) {
            info!(claim_id = %claim_id, code = %response.response_code, "Duplicate payer response ignored");
            return Ok(IngestOutcome {
                claim: current,
                kind,
                duplicate: true,
                posting: None,
                denials: Vec::new(),
            });
        }
        info!(
            claim_id = %claim_id,
            code = %response.response_code,
            message = %self.redactor.redact_opt(response.response_message.as_deref()),
            "Payer response received"
        );

        let (claim, (duplicate, posting, denials)) = self
            .mutate_locked(claim_id, actor, "ingest payer response", |tx, postings| {
                if tx.claim().ingested_responses.contains(&fingerprint) {
                    return Ok((true, None, Vec::new()));
                }
                let status = tx.status();
                if !status.is_submitted() {
                    return Err(Violation::OperationNotAllowed {
                        operation: "record a payer response",
                        status,
                    }
                    .into());
                }
                {
                    let claim = tx.claim_mut();
                    claim.payer_response = Some(PayerResponseInfo {
                        code: response.response_code.trim().to_string(),
                        message: response.response_message.clone(),
                        received_at: response.received_at,
                    });
                    claim.ingested_responses.push(fingerprint.clone());
                }
                let metadata = json!({ "response_code": response.response_code, "kind": kind });
                let mut posting = None;
                let mut denials = Vec::new();

                match kind {
                    ResponseKind::Accepted if status == ClaimStatus::Submitted => {
                        tx.transition(ClaimStatus::Accepted, ClaimAction::Accepted, None, metadata)?;
                    }
                    ResponseKind::Accepted => {
                        tx.record(ClaimAction::PayerResponseRecorded, None, metadata);
                    }
                    ResponseKind::Pending => {
                        if matches!(status, ClaimStatus::Submitted | ClaimStatus::Accepted) {
                            advance_to_pending(tx, &metadata)?;
                        } else {
                            tx.record(ClaimAction::PayerResponseRecorded, None, metadata);
                        }
                    }
                    ResponseKind::Rejected => {
                        tx.transition(
                            ClaimStatus::Rejected,
                            ClaimAction::Rejected,
                            response.response_message.clone(),
                            metadata,
                        )?;
                    }
                    ResponseKind::Processed | ResponseKind::Denied => {
                        advance_to_pending(tx, &metadata)?;
                        let remittance = response.remittance.clone().unwrap_or_default();
                        if let Some(payment) = &remittance.payment {
                            posting = Some(post_in(tx, postings, payment)?);
                        }
                        for request in &remittance.denials {
                            denials.push(deny_in(tx, request)?);
                        }
                        if kind == ResponseKind::Denied && denials.is_empty() {
                            let request = DenialRequest {
                                line_item_id: None,
                                code: response.response_code.trim().to_string(),
                                reason: response
                                    .response_message
                                    .clone()
                                    .unwrap_or_else(|| "Denied by payer".to_string()),
                                category: DenialCategory::Other,
                                denial_date: Some(response.received_at.date_naive()),
                            };
                            denials.push(deny_in(tx, &request)?);
                        }
                        let fallback = tx.status();
                        tx.settle(ClaimAction::PayerResponseRecorded, fallback, metadata)?;
                    }
                }
                Ok((false, posting, denials))
            })
            .await?;

        Ok(IngestOutcome {
            claim,
            kind,
            duplicate,
            posting,
            denials,
        })
    }

    /// Post a payment and settle the claim status from the ledger.
    pub async fn post_payment(
        &self,
        claim_id: Uuid,
        request: PaymentRequest,
        actor: &Actor,
    ) -> ClaimsResult<PostingOutcome> {
        let (claim, posting) = self
            .mutate(claim_id, actor, "post payment", |tx, postings| {
                let posting = post_in(tx, postings, &request)?;
                let fallback = tx.status();
                tx.settle(
                    ClaimAction::PaymentPosted,
                    fallback,
                    json!({
                        "posting_id": posting.id,
                        "payment_amount": posting.payment_amount,
                        "allocated_amount": posting.allocated_amount,
                        "unallocated_amount": posting.unallocated_amount,
                    }),
                )?;
                Ok(posting)
            })
            .await?;
        Ok(PostingOutcome { claim, posting })
    }

    /// Record a line-level or claim-level denial.
    pub async fn record_denial(
        &self,
        claim_id: Uuid,
        request: DenialRequest,
        actor: &Actor,
    ) -> ClaimsResult<DenialOutcome> {
        let (claim, denial) = self
            .mutate(claim_id, actor, "record denial", |tx, _| {
                let denial = deny_in(tx, &request)?;
                let fallback = tx.status();
                tx.settle(
                    ClaimAction::DenialRecorded,
                    fallback,
                    json!({
                        "denial_id": denial.id,
                        "denial_code": denial.denial_code,
                        "denied_amount": denial.denied_amount,
                    }),
                )?;
                Ok(denial)
            })
            .await?;
        info!(
            claim_id = %claim_id,
            denial_id = %denial.id,
            code = %denial.denial_code,
            reason = %self.redactor.redact(&denial.denial_reason),
            "Denial recorded"
        );
        Ok(DenialOutcome { claim, denial })
    }

    async fn load_denial(&self, denial_id: Uuid) -> ClaimsResult<ClaimDenial> {
        self.repository
            .get_denial(denial_id)
            .await?
            .ok_or_else(|| ClaimsError::denial_not_found(denial_id))
    }

    pub async fn file_appeal(&self, denial_id: Uuid, actor: &Actor) -> ClaimsResult<DenialOutcome> {
        let claim_id = self.load_denial(denial_id).await?.claim_id;
        let (claim, denial) = self
            .mutate(claim_id, actor, "file appeal", |tx, _| {
                let status = tx.status();
                if !matches!(
                    status,
                    ClaimStatus::Denied | ClaimStatus::PartialPaid | ClaimStatus::Appealed
                ) {
                    return Err(Violation::OperationNotAllowed {
                        operation: "file an appeal",
                        status,
                    }
                    .into());
                }
                let now = tx.now();
                let updated = {
                    let denial = tx
                        .denial_mut(denial_id)
                        .ok_or_else(|| ClaimsError::denial_not_found(denial_id))?;
                    denial.file_appeal(now)?;
                    denial.clone()
                };
                let metadata = json!({ "denial_id": denial_id });
                if status == ClaimStatus::Appealed {
                    tx.record(ClaimAction::AppealFiled, None, metadata);
                } else {
                    tx.transition(ClaimStatus::Appealed, ClaimAction::AppealFiled, None, metadata)?;
                }
                Ok(updated)
            })
            .await?;
        Ok(DenialOutcome { claim, denial })
    }

    pub async fn begin_appeal_review(
        &self,
        denial_id: Uuid,
        actor: &Actor,
    ) -> ClaimsResult<DenialOutcome> {
        let claim_id = self.load_denial(denial_id).await?.claim_id;
        let (claim, denial) = self
            .mutate(claim_id, actor, "begin appeal review", |tx, _| {
                let status = tx.status();
                if status != ClaimStatus::Appealed {
                    return Err(Violation::OperationNotAllowed {
                        operation: "review an appeal",
                        status,
                    }
                    .into());
                }
                let now = tx.now();
                let updated = {
                    let denial = tx
                        .denial_mut(denial_id)
                        .ok_or_else(|| ClaimsError::denial_not_found(denial_id))?;
                    denial.begin_review(now)?;
                    denial.clone()
                };
                tx.record(
                    ClaimAction::AppealReviewStarted,
                    None,
                    json!({ "denial_id": denial_id }),
                );
                Ok(updated)
            })
            .await?;
        Ok(DenialOutcome { claim, denial })
    }

    /// Record the appeal outcome. An approval reopens the denied lines and
    /// settles the claim from the ledger; a denied or withdrawn appeal closes
    /// the claim once no other appeal is open.
    pub async fn resolve_appeal(
        &self,
        denial_id: Uuid,
        outcome: AppealOutcome,
        notes: Option<String>,
        actor: &Actor,
    ) -> ClaimsResult<DenialOutcome> {
        let claim_id = self.load_denial(denial_id).await?.claim_id;
        let (claim, denial) = self
            .mutate(claim_id, actor, "resolve appeal", |tx, _| {
                let status = tx.status();
                if status != ClaimStatus::Appealed {
                    return Err(Violation::OperationNotAllowed {
                        operation: "resolve an appeal",
                        status,
                    }
                    .into());
                }
                let now = tx.now();
                let updated = {
                    let denial = tx
                        .denial_mut(denial_id)
                        .ok_or_else(|| ClaimsError::denial_not_found(denial_id))?;
                    denial.resolve(outcome, notes.clone(), now)?;
                    denial.clone()
                };
                if outcome == AppealOutcome::Approved {
                    denial::reopen_lines(tx.claim_mut(), denial_id, now);
                }
                let metadata = json!({ "denial_id": denial_id, "outcome": outcome });
                if tx.has_open_appeal() {
                    tx.record(ClaimAction::AppealResolved, notes.clone(), metadata);
                } else if outcome == AppealOutcome::Approved {
                    tx.settle(ClaimAction::AppealResolved, ClaimStatus::Pending, metadata)?;
                } else {
                    tx.transition(
                        ClaimStatus::Closed,
                        ClaimAction::AppealResolved,
                        notes.clone(),
                        metadata,
                    )?;
                }
                Ok(updated)
            })
            .await?;
        info!(
            claim_id = %claim_id,
            denial_id = %denial_id,
            outcome = ?outcome,
            status = %claim.status,
            "Appeal resolved"
        );
        Ok(DenialOutcome { claim, denial })
    }

    /// Return a rejected claim to draft so it can be fixed and resubmitted.
    pub async fn correct_rejected_claim(
        &self,
        claim_id: Uuid,
        notes: Option<String>,
        actor: &Actor,
    ) -> ClaimsResult<Claim> {
        let (claim, ()) = self
            .mutate(claim_id, actor, "correct rejected claim", |tx, _| {
                let status = tx.status();
                if status != ClaimStatus::Rejected {
                    return Err(Violation::OperationNotAllowed {
                        operation: "correct",
                        status,
                    }
                    .into());
                }
                let attempts = tx.claim().submission_attempts;
                tx.transition(
                    ClaimStatus::Draft,
                    ClaimAction::Corrected,
                    notes.clone(),
                    json!({ "submission_attempts": attempts }),
                )?;
                Ok(())
            })
            .await?;
        Ok(claim)
    }

    pub async fn cancel_claim(
        &self,
        claim_id: Uuid,
        reason: Option<String>,
        actor: &Actor,
    ) -> ClaimsResult<Claim> {
        let (claim, ()) = self
            .mutate(claim_id, actor, "cancel claim", |tx, _| {
                if tx.claim().has_applied_money() {
                    return Err(Violation::CancelAfterPayment.into());
                }
                tx.transition(
                    ClaimStatus::Cancelled,
                    ClaimAction::Cancelled,
                    reason.clone(),
                    serde_json::Value::Null,
                )?;
                Ok(())
            })
            .await?;
        Ok(claim)
    }

    /// Void a claim. Money already applied is backed out with a reversal
    /// posting so the ledger nets to zero.
    pub async fn void_claim(
        &self,
        claim_id: Uuid,
        reason: Option<String>,
        actor: &Actor,
    ) -> ClaimsResult<VoidOutcome> {
        let (claim, reversal) = self
            .mutate(claim_id, actor, "void claim", |tx, _| {
                ensure_transition(tx.status(), ClaimStatus::Voided)?;
                let (actor, now) = (tx.actor().clone(), tx.now());
                let reversal = payment::reverse_applied(tx.claim_mut(), &actor, now);
                if let Some(posting) = &reversal {
                    tx.add_posting(posting.clone());
                }
                tx.transition(
                    ClaimStatus::Voided,
                    ClaimAction::Voided,
                    reason.clone(),
                    json!({ "reversal_posting_id": reversal.as_ref().map(|p| p.id) }),
                )?;
                Ok(reversal)
            })
            .await?;
        Ok(VoidOutcome { claim, reversal })
    }

    pub async fn close_claim(
        &self,
        claim_id: Uuid,
        notes: Option<String>,
        actor: &Actor,
    ) -> ClaimsResult<Claim> {
        let (claim, ()) = self
            .mutate(claim_id, actor, "close claim", |tx, _| {
                tx.transition(
                    ClaimStatus::Closed,
                    ClaimAction::Closed,
                    notes.clone(),
                    serde_json::Value::Null,
                )?;
                Ok(())
            })
            .await?;
        Ok(claim)
    }

    // ------------------------------------------------------------------
    // Coordination of benefits
    // ------------------------------------------------------------------

    /// Bill the next payer for what the source payer left. The new claim and
    /// the source claim's history entry are written in one commit.
    pub async fn derive_secondary_claim(
        &self,
        source_claim_id: Uuid,
        info: SecondaryPayerInfo,
        actor: &Actor,
    ) -> ClaimsResult<Claim> {
        let operation = "derive secondary claim";
        let _guard = self.lock_claim(source_claim_id).await;
        let mut attempt = 0;
        loop {
            let source = self.load_claim(source_claim_id).await?;
            let existing = self.repository.find_derived_claims(source_claim_id).await?;
            let derived = cob::derive_secondary(&source, &info, &existing, actor, Utc::now())
                .map_err(|violation| {
                    let err = ClaimsError::from(violation);
                    self.log_rejection(operation, source_claim_id, &err);
                    err
                })?;
            let derived_commit = ClaimTransaction::create(
                derived,
                actor.clone(),
                Some(format!("billed from claim {}", source_claim_id)),
            )
            .into_commit()?;
            let created = derived_commit.claim.clone();

            let mut tx = ClaimTransaction::begin(source, Vec::new(), actor.clone());
            tx.record(
                ClaimAction::SecondaryDerived,
                None,
                json!({
                    "derived_claim_id": created.id,
                    "rank": created.payer.rank,
                    "secondary_charges": created.financials.total_charges,
                }),
            );
            let source_commit = tx.into_commit()?;

            match self
                .repository
                .commit_all(vec![source_commit, derived_commit])
                .await
            {
                Ok(()) => {
                    info!(
                        source_claim_id = %source_claim_id,
                        derived_claim_id = %created.id,
                        rank = %created.payer.rank,
                        charges = %created.financials.total_charges,
                        "Derived claim created for next payer"
                    );
                    return Ok(created);
                }
                Err(ClaimsError::Conflict { .. }) if attempt < self.config.max_conflict_retries => {
                    attempt += 1;
                    warn!(claim_id = %source_claim_id, operation, attempt, "Version conflict, replaying mutation");
                }
                Err(err) => {
                    self.log_rejection(operation, source_claim_id, &err);
                    return Err(err);
                }
            }
        }
    }

    /// Reconcile every source/derived pair the claim belongs to.
    pub async fn reconcile_claim(&self, claim_id: Uuid) -> ClaimsResult<Vec<ReconciliationReport>> {
        let claim = self.load_claim(claim_id).await?;
        let mut reports = Vec::new();
        if let Some(link) = &claim.cob {
            if let Some(source) = self.repository.get_claim(link.source_claim_id).await? {
                reports.push(cob::reconcile(&source, &claim));
            }
        }
        for derived in self.repository.find_derived_claims(claim_id).await? {
            if matches!(derived.status, ClaimStatus::Cancelled | ClaimStatus::Voided) {
                continue;
            }
            reports.push(cob::reconcile(&claim, &derived));
        }
        Ok(reports)
    }

    /// Reconcile after a claim settles as paid or denied. Discrepancies are
    /// stored and logged, never corrected.
    async fn after_settlement(&self, previous: ClaimStatus, claim: &Claim) {
        if previous == claim.status
            || !matches!(claim.status, ClaimStatus::Paid | ClaimStatus::Denied)
        {
            return;
        }
        if claim.cob.is_none() && claim.payer.rank.next().is_none() {
            return;
        }
        let reports = match self.reconcile_claim(claim.id).await {
            Ok(reports) => reports,
            Err(err) => {
                error!(claim_id = %claim.id, error = %err, "Reconciliation failed");
                return;
            }
        };
        for report in reports {
            if report.is_balanced() {
                debug!(
                    source_claim_id = %report.source_claim_id,
                    derived_claim_id = %report.derived_claim_id,
                    "Claim pair reconciles"
                );
                continue;
            }
            warn!(
                source_claim_id = %report.source_claim_id,
                derived_claim_id = %report.derived_claim_id,
                discrepancy = %report.discrepancy,
                original_total = %report.original_total_charges,
                "Reconciliation discrepancy detected"
            );
            let discrepancy = ReconciliationDiscrepancy {
                id: Uuid::new_v4(),
                trigger_claim_id: claim.id,
                report,
                detected_at: Utc::now(),
            };
            if let Err(err) = self.repository.record_discrepancy(&discrepancy).await {
                error!(claim_id = %claim.id, error = %err, "Failed to store reconciliation discrepancy");
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_claim(&self, claim_id: Uuid) -> ClaimsResult<Claim> {
        self.load_claim(claim_id).await
    }

    pub async fn list_claims(&self, filter: &ClaimFilter) -> ClaimsResult<Vec<Claim>> {
        self.repository.list_claims(filter).await
    }

    pub async fn derived_claims(&self, claim_id: Uuid) -> ClaimsResult<Vec<Claim>> {
        self.load_claim(claim_id).await?;
        self.repository.find_derived_claims(claim_id).await
    }

    pub async fn list_postings(&self, claim_id: Uuid) -> ClaimsResult<Vec<PaymentPosting>> {
        self.load_claim(claim_id).await?;
        self.repository.list_postings(claim_id).await
    }

    pub async fn list_denials(&self, claim_id: Uuid) -> ClaimsResult<Vec<ClaimDenial>> {
        self.load_claim(claim_id).await?;
        self.repository.list_denials(claim_id).await
    }

    pub async fn get_denial(&self, denial_id: Uuid) -> ClaimsResult<ClaimDenial> {
        self.load_denial(denial_id).await
    }

    pub async fn claim_history(
        &self,
        claim_id: Uuid,
    ) -> ClaimsResult<Vec<crate::history::WorkflowHistoryEntry>> {
        self.load_claim(claim_id).await?;
        self.repository.history(claim_id).await
    }

    /// Check the stored history chain and that its head matches the claim.
    pub async fn verify_history(&self, claim_id: Uuid) -> ClaimsResult<ChainVerification> {
        let claim = self.load_claim(claim_id).await?;
        let entries = self.repository.history(claim_id).await?;
        let mut result = verify_chain(&entries);
        if result.valid {
            let head = entries
                .last()
                .map(|e| e.entry_hash.as_str())
                .unwrap_or(GENESIS_HASH);
            if head != claim.history_head || entries.len() as u64 != claim.history_sequence {
                result.valid = false;
                result.first_invalid_sequence = Some(claim.history_sequence);
                result.reason = Some("history is missing entries recorded on the claim".to_string());
            }
        }
        if !result.valid {
            error!(
                claim_id = %claim_id,
                sequence = ?result.first_invalid_sequence,
                reason = ?result.reason,
                "Claim history failed verification"
            );
        }
        Ok(result)
    }

    pub async fn list_discrepancies(&self) -> ClaimsResult<Vec<ReconciliationDiscrepancy>> {
        self.repository.list_discrepancies().await
    }

    pub async fn claims_summary(&self, filter: &ClaimFilter) -> ClaimsResult<ClaimsSummary> {
        let claims = self.repository.list_claims(filter).await?;
        let mut denials = Vec::new();
        for claim in &claims {
            denials.extend(self.repository.list_denials(claim.id).await?);
        }
        Ok(reporting::claims_summary(&claims, &denials))
    }

    /// Submitted claims still waiting on the payer past the response window.
    pub async fn find_stale_submissions(
        &self,
        as_of: DateTime<Utc>,
    ) -> ClaimsResult<Vec<StaleSubmission>> {
        let filter = ClaimFilter {
            status: Some(ClaimStatus::Submitted),
            ..Default::default()
        };
        let claims = self.repository.list_claims(&filter).await?;
        let stale = monitor::stale_submissions(
            &claims,
            as_of,
            Duration::hours(self.config.response_timeout_hours),
        );
        for item in &stale {
            warn!(
                claim_id = %item.claim_id,
                payer_id = %item.payer_id,
                hours_waiting = item.hours_waiting,
                "No payer response within timeout"
            );
        }
        Ok(stale)
    }

    pub async fn find_secondary_candidates(&self) -> ClaimsResult<Vec<SecondaryCandidate>> {
        let claims = self.repository.list_claims(&ClaimFilter::default()).await?;
        Ok(monitor::secondary_candidates(&claims))
    }
}

fn advance_to_pending(
    tx: &mut ClaimTransaction,
    metadata: &serde_json::Value,
) -> Result<(), Violation> {
    if tx.status() == ClaimStatus::Submitted {
        tx.transition(
            ClaimStatus::Accepted,
            ClaimAction::Accepted,
            None,
            metadata.clone(),
        )?;
    }
    if tx.status() == ClaimStatus::Accepted {
        tx.transition(
            ClaimStatus::Pending,
            ClaimAction::AdjudicationPending,
            None,
            metadata.clone(),
        )?;
    }
    Ok(())
}

fn post_in(
    tx: &mut ClaimTransaction,
    prior: &[PaymentPosting],
    request: &PaymentRequest,
) -> Result<PaymentPosting, Violation> {
    let status = tx.status();
    if !status.accepts_payments() {
        return Err(Violation::OperationNotAllowed {
            operation: "post a payment",
            status,
        });
    }
    payment::validate_payment(tx.claim(), prior, request)?;
    let (actor, now) = (tx.actor().clone(), tx.now());
    let posting = payment::apply_payment(tx.claim_mut(), request, &actor, now)?;
    tx.claim_mut().payment = Some(PaymentInfo {
        received_on: request.payment_date,
        method: request.method,
        check_number: request.check_number.clone(),
        reference_number: request.reference_number.clone(),
    });
    tx.add_posting(posting.clone());
    Ok(posting)
}

fn deny_in(tx: &mut ClaimTransaction, request: &DenialRequest) -> Result<ClaimDenial, Violation> {
    let status = tx.status();
    if !matches!(status, ClaimStatus::Pending | ClaimStatus::PartialPaid) {
        return Err(Violation::OperationNotAllowed {
            operation: "record a denial",
            status,
        });
    }
    let (actor, now) = (tx.actor().clone(), tx.now());
    let denial = denial::record_denial(tx.claim_mut(), request, &actor, now)?;
    tx.add_denial(denial.clone());
    Ok(denial)
}
