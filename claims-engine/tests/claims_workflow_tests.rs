//! Claims Workflow Tests
//!
//! These tests walk claims through the engine the way a billing office does:
//! 1. Full payment with contractual adjustment
//! 2. Partial payments that settle once the allowed amount is reached
//! 3. Denial, appeal and payment after the appeal is approved
//! 4. Secondary billing and reconciliation of the claim pair
//! 5. Transport failures, redelivered responses and version conflicts

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use claims_engine::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn biller() -> Actor {
    Actor::new("biller-7")
}

fn payer(rank: PayerRank, payer_id: &str) -> PayerContext {
    PayerContext {
        rank,
        payer_id: payer_id.to_string(),
        payer_name: None,
        member_id: "MBR-2231".to_string(),
        group_number: None,
        plan_name: None,
        relationship_code: "18".to_string(),
    }
}

fn new_claim() -> NewClaim {
    NewClaim {
        patient_ref: "patient-42".to_string(),
        visit_ref: Some("visit-9".to_string()),
        rendering_provider_ref: Some("1881234567".to_string()),
        billing_provider_ref: None,
        facility_ref: None,
        payer: payer(PayerRank::Primary, "AETNA"),
        diagnoses: vec!["e11.9".to_string(), "I10".to_string()],
        principal_diagnosis: None,
        claim_type: ClaimType::Professional,
        place_of_service_code: Some("11".to_string()),
        service_date_start: NaiveDate::from_ymd_opt(2024, 5, 2),
        service_date_end: NaiveDate::from_ymd_opt(2024, 5, 2),
        notes: None,
    }
}

fn line(procedure_code: &str, charge: Decimal) -> NewLineItem {
    NewLineItem {
        procedure_code: procedure_code.to_string(),
        modifier: None,
        description: None,
        diagnosis_pointers: vec![1],
        units: Decimal::ONE,
        unit_charge: charge,
        service_date: None,
        place_of_service_code: None,
    }
}

fn allocation(line_item_id: Uuid, paid: Decimal) -> AllocationRequest {
    AllocationRequest {
        line_item_id,
        paid_amount: paid,
        adjustment_amount: Decimal::ZERO,
        patient_responsibility: Decimal::ZERO,
        allowed_amount: None,
        notes: None,
    }
}

fn payment(amount: Decimal, allocations: Vec<AllocationRequest>) -> PaymentRequest {
    PaymentRequest {
        amount,
        payment_date: Utc::now().date_naive(),
        method: PaymentMethod::Eft,
        payment_type: PaymentType::InsurancePayment,
        check_number: None,
        check_date: None,
        reference_number: None,
        trace_number: None,
        allocations,
        notes: None,
    }
}

fn response(code: &str, remittance: Option<Remittance>) -> PayerResponse {
    PayerResponse {
        response_code: code.to_string(),
        response_message: None,
        received_at: Utc::now(),
        remittance,
    }
}

fn create_test_service() -> ClaimsService {
    ClaimsService::new(
        Arc::new(InMemoryClaimRepository::new()),
        Arc::new(ManualTransport),
        ClaimsConfig::default(),
    )
    .unwrap()
}

/// Create a claim with one line per charge, submit it and move it into
/// adjudication.
async fn pending_claim(
    service: &ClaimsService,
    payer_ctx: Option<PayerContext>,
    charges: &[Decimal],
) -> Claim {
    let mut request = new_claim();
    if let Some(ctx) = payer_ctx {
        request.payer = ctx;
    }
    let claim = service.create_claim(request, &biller()).await.unwrap();
    for (index, &charge) in charges.iter().enumerate() {
        service
            .add_line_item(claim.id, line(&format!("9921{}", index + 3), charge), &biller())
            .await
            .unwrap();
    }
    service.mark_ready_to_submit(claim.id, &biller()).await.unwrap();
    service.submit_claim(claim.id, None, &biller()).await.unwrap();
    let outcome = service
        .ingest_payer_response(claim.id, response("A3", None), &biller())
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::Pending);
    outcome.claim
}

// ============================================================================
// Payment posting
// ============================================================================

#[tokio::test]
async fn test_full_payment_with_adjustment_pays_claim() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(150)]).await;
    let line_id = claim.line_items[0].id;

    let mut alloc = allocation(line_id, dec!(120));
    alloc.adjustment_amount = dec!(30);
    let outcome = service
        .post_payment(claim.id, payment(dec!(120), vec![alloc]), &biller())
        .await
        .unwrap();

    assert_eq!(outcome.claim.status, ClaimStatus::Paid);
    assert_eq!(outcome.claim.financials.amount_paid, dec!(120));
    assert_eq!(outcome.claim.financials.outstanding, Decimal::ZERO);
    assert_eq!(outcome.posting.allocated_amount, dec!(120));
    assert_eq!(outcome.claim.payment.as_ref().map(|p| p.method), Some(PaymentMethod::Eft));
}

#[tokio::test]
async fn test_partial_payments_settle_at_allowed_amount() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(150)]).await;
    let line_id = claim.line_items[0].id;

    let mut first = allocation(line_id, dec!(80));
    first.allowed_amount = Some(dec!(120));
    let outcome = service
        .post_payment(claim.id, payment(dec!(80), vec![first]), &biller())
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::PartialPaid);
    assert_eq!(outcome.claim.financials.outstanding, dec!(40));
    assert_eq!(outcome.claim.financials.write_off, dec!(30));

    let outcome = service
        .post_payment(claim.id, payment(dec!(40), vec![allocation(line_id, dec!(40))]), &biller())
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::Paid);
    assert_eq!(outcome.claim.line_items[0].paid_amount, dec!(120));

    let postings = service.list_postings(claim.id).await.unwrap();
    assert_eq!(postings.len(), 2);
}

#[tokio::test]
async fn test_rejected_posting_changes_nothing() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(100)]).await;
    let history_before = service.claim_history(claim.id).await.unwrap().len();

    let err = service
        .post_payment(
            claim.id,
            payment(dec!(150), vec![allocation(claim.line_items[0].id, dec!(150))]),
            &biller(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::AllocationExceedsAllowed { line_number: 1, .. })
    ));

    let stored = service.get_claim(claim.id).await.unwrap();
    assert_eq!(stored.version, claim.version);
    assert_eq!(stored.financials.amount_paid, Decimal::ZERO);
    assert_eq!(service.claim_history(claim.id).await.unwrap().len(), history_before);
    assert!(service.list_postings(claim.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payment_refused_before_adjudication() {
    let service = create_test_service();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    let (claim, line) = service
        .add_line_item(claim.id, line("99213", dec!(100)), &biller())
        .await
        .unwrap();

    let err = service
        .post_payment(claim.id, payment(dec!(10), vec![allocation(line.id, dec!(10))]), &biller())
        .await
        .unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::OperationNotAllowed { status: ClaimStatus::Draft, .. })
    ));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_illegal_transition_writes_no_history() {
    let service = create_test_service();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();

    let err = service.close_claim(claim.id, None, &biller()).await.unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::IllegalTransition {
            from: ClaimStatus::Draft,
            to: ClaimStatus::Closed
        })
    ));
    assert_eq!(service.claim_history(claim.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_claim_without_lines_cannot_be_submitted() {
    let service = create_test_service();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    let err = service.mark_ready_to_submit(claim.id, &biller()).await.unwrap_err();
    assert_eq!(err.violation(), Some(&Violation::NoLineItems));
}

#[tokio::test]
async fn test_create_claim_normalizes_diagnoses() {
    let service = create_test_service();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    assert_eq!(claim.diagnosis_codes, vec!["E11.9".to_string(), "I10".to_string()]);
    assert_eq!(claim.principal_diagnosis.as_deref(), Some("E11.9"));
    assert_eq!(claim.version, 1);

    let mut duplicate = new_claim();
    duplicate.diagnoses = vec!["I10".to_string(), " i10".to_string()];
    let err = service.create_claim(duplicate, &biller()).await.unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::DuplicateDiagnosis { .. })));
}

#[tokio::test]
async fn test_rejected_claim_is_corrected_and_resubmitted() {
    let service = create_test_service();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    service
        .add_line_item(claim.id, line("99214", dec!(180)), &biller())
        .await
        .unwrap();
    service.mark_ready_to_submit(claim.id, &biller()).await.unwrap();
    let submitted = service.submit_claim(claim.id, None, &biller()).await.unwrap();
    let claim_number = submitted.claim_number.clone();
    assert!(claim_number.as_deref().is_some_and(|n| n.starts_with("CLM-")));

    let outcome = service
        .ingest_payer_response(claim.id, response("R1", None), &biller())
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::Rejected);

    let corrected = service
        .correct_rejected_claim(claim.id, Some("fixed member id".to_string()), &biller())
        .await
        .unwrap();
    assert_eq!(corrected.status, ClaimStatus::Draft);
    service
        .update_diagnoses(
            claim.id,
            DiagnosisUpdate {
                codes: vec!["E11.65".to_string()],
                principal: None,
            },
            &biller(),
        )
        .await
        .unwrap();

    service.mark_ready_to_submit(claim.id, &biller()).await.unwrap();
    let resubmitted = service.submit_claim(claim.id, None, &biller()).await.unwrap();
    assert_eq!(resubmitted.status, ClaimStatus::Submitted);
    assert_eq!(resubmitted.submission_attempts, 2);
    assert_eq!(resubmitted.claim_number, claim_number);
    assert!(service.verify_history(claim.id).await.unwrap().valid);
}

#[tokio::test]
async fn test_cancel_refused_once_money_applied() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(100)]).await;
    service
        .post_payment(
            claim.id,
            payment(dec!(40), vec![allocation(claim.line_items[0].id, dec!(40))]),
            &biller(),
        )
        .await
        .unwrap();

    let err = service.cancel_claim(claim.id, None, &biller()).await.unwrap_err();
    assert_eq!(err.violation(), Some(&Violation::CancelAfterPayment));
}

#[tokio::test]
async fn test_void_reverses_applied_money() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(100)]).await;
    service
        .post_payment(
            claim.id,
            payment(dec!(60), vec![allocation(claim.line_items[0].id, dec!(60))]),
            &biller(),
        )
        .await
        .unwrap();

    let outcome = service
        .void_claim(claim.id, Some("billed to wrong patient".to_string()), &biller())
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::Voided);
    assert_eq!(outcome.claim.financials.amount_paid, Decimal::ZERO);
    let reversal = outcome.reversal.unwrap();
    assert_eq!(reversal.payment_amount, dec!(-60));
    assert_eq!(reversal.payment_type, PaymentType::Reversal);

    let postings = service.list_postings(claim.id).await.unwrap();
    let net: Decimal = postings.iter().map(|p| p.payment_amount).sum();
    assert_eq!(net, Decimal::ZERO);

    let err = service.close_claim(claim.id, None, &biller()).await.unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::IllegalTransition { .. })));
}

// ============================================================================
// Denials and appeals
// ============================================================================

#[tokio::test]
async fn test_approved_appeal_returns_claim_to_pending() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(150)]).await;

    let denied = service
        .record_denial(
            claim.id,
            DenialRequest {
                line_item_id: None,
                code: "CO-197".to_string(),
                reason: "Precertification absent".to_string(),
                category: DenialCategory::PriorAuthorization,
                denial_date: None,
            },
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(denied.claim.status, ClaimStatus::Denied);
    assert_eq!(denied.denial.denied_amount, dec!(150));
    assert_eq!(denied.claim.denial.as_ref().map(|d| d.code.as_str()), Some("CO-197"));

    let appealed = service.file_appeal(denied.denial.id, &biller()).await.unwrap();
    assert_eq!(appealed.claim.status, ClaimStatus::Appealed);
    service.begin_appeal_review(denied.denial.id, &biller()).await.unwrap();

    let resolved = service
        .resolve_appeal(
            denied.denial.id,
            AppealOutcome::Approved,
            Some("auth on file".to_string()),
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(resolved.claim.status, ClaimStatus::Pending);
    assert_eq!(resolved.denial.appeal_status, AppealStatus::AppealApproved);
    assert!(resolved.denial.resolved);
    assert_eq!(resolved.claim.line_items[0].status, LineItemStatus::Pending);
    assert!(resolved.claim.denial.is_none());

    let paid = service
        .post_payment(
            claim.id,
            payment(dec!(150), vec![allocation(claim.line_items[0].id, dec!(150))]),
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(paid.claim.status, ClaimStatus::Paid);
    assert!(paid.claim.denial.is_none());
}

#[tokio::test]
async fn test_line_denial_leaves_other_lines_payable() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(100), dec!(50)]).await;
    let (first_line, second_line) = (claim.line_items[0].id, claim.line_items[1].id);

    let denied = service
        .record_denial(
            claim.id,
            DenialRequest {
                line_item_id: Some(first_line),
                code: "CO-50".to_string(),
                reason: "Not medically necessary".to_string(),
                category: DenialCategory::MedicalNecessity,
                denial_date: None,
            },
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(denied.claim.status, ClaimStatus::Pending);
    assert_eq!(denied.denial.denied_amount, dec!(100));
    assert_eq!(denied.claim.line_items[0].status, LineItemStatus::Denied);
    assert_eq!(denied.claim.line_items[1].status, LineItemStatus::Pending);
    assert!(denied.claim.denial.is_none());

    let paid = service
        .post_payment(
            claim.id,
            payment(dec!(50), vec![allocation(second_line, dec!(50))]),
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(paid.claim.status, ClaimStatus::PartialPaid);
    assert_eq!(paid.claim.line_items[1].status, LineItemStatus::Paid);
    assert_eq!(paid.claim.financials.amount_paid, dec!(50));
    assert_eq!(paid.claim.denied_balance(), dec!(100));
}

#[tokio::test]
async fn test_denying_every_open_line_denies_claim() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(100), dec!(50)]).await;

    for line in &claim.line_items {
        service
            .record_denial(
                claim.id,
                DenialRequest {
                    line_item_id: Some(line.id),
                    code: "CO-29".to_string(),
                    reason: "Timely filing limit expired".to_string(),
                    category: DenialCategory::TimelyFiling,
                    denial_date: None,
                },
                &biller(),
            )
            .await
            .unwrap();
    }

    let claim = service.get_claim(claim.id).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Denied);
    assert_eq!(claim.denial.as_ref().map(|d| d.code.as_str()), Some("CO-29"));
}

#[tokio::test]
async fn test_lost_appeal_closes_claim() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(90)]).await;
    let denied = service
        .record_denial(
            claim.id,
            DenialRequest {
                line_item_id: Some(claim.line_items[0].id),
                code: "CO-50".to_string(),
                reason: "Not medically necessary".to_string(),
                category: DenialCategory::MedicalNecessity,
                denial_date: None,
            },
            &biller(),
        )
        .await
        .unwrap();
    service.file_appeal(denied.denial.id, &biller()).await.unwrap();

    let resolved = service
        .resolve_appeal(denied.denial.id, AppealOutcome::Denied, None, &biller())
        .await
        .unwrap();
    assert_eq!(resolved.claim.status, ClaimStatus::Closed);
    assert_eq!(resolved.denial.appeal_status, AppealStatus::AppealDenied);
}

#[tokio::test]
async fn test_denial_response_creates_claim_level_denial() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(75), dec!(25)]).await;
    let mut denied = response("4", None);
    denied.response_message = Some("Coverage terminated".to_string());

    let outcome = service
        .ingest_payer_response(claim.id, denied, &biller())
        .await
        .unwrap();
    assert_eq!(outcome.kind, ResponseKind::Denied);
    assert_eq!(outcome.claim.status, ClaimStatus::Denied);
    assert_eq!(outcome.denials.len(), 1);
    assert_eq!(outcome.denials[0].denied_amount, dec!(100));
    assert_eq!(outcome.denials[0].denial_reason, "Coverage terminated");
}

// ============================================================================
// Payer responses
// ============================================================================

#[tokio::test]
async fn test_redelivered_remittance_is_applied_once() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(200)]).await;
    let mut remit_payment = payment(dec!(160), vec![allocation(claim.line_items[0].id, dec!(160))]);
    remit_payment.trace_number = Some("EFT-000981".to_string());
    let remittance = response(
        "1",
        Some(Remittance {
            payment: Some(remit_payment),
            denials: Vec::new(),
        }),
    );

    let first = service
        .ingest_payer_response(claim.id, remittance.clone(), &biller())
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert!(first.posting.is_some());
    assert_eq!(first.claim.status, ClaimStatus::PartialPaid);

    let second = service
        .ingest_payer_response(claim.id, remittance, &biller())
        .await
        .unwrap();
    assert!(second.duplicate);
    assert_eq!(second.claim.version, first.claim.version);
    assert_eq!(service.list_postings(claim.id).await.unwrap().len(), 1);
    assert_eq!(second.claim.financials.amount_paid, dec!(160));
}

#[tokio::test]
async fn test_processed_response_walks_through_acceptance() {
    let service = create_test_service();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    let (_, line) = service
        .add_line_item(claim.id, line("99213", dec!(110)), &biller())
        .await
        .unwrap();
    service.mark_ready_to_submit(claim.id, &biller()).await.unwrap();
    service.submit_claim(claim.id, None, &biller()).await.unwrap();

    let mut alloc = allocation(line.id, dec!(90));
    alloc.patient_responsibility = dec!(20);
    let outcome = service
        .ingest_payer_response(
            claim.id,
            response(
                "1",
                Some(Remittance {
                    payment: Some(payment(dec!(90), vec![alloc])),
                    denials: Vec::new(),
                }),
            ),
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::Paid);

    let statuses: Vec<ClaimStatus> = service
        .claim_history(claim.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.to_status)
        .collect();
    assert!(statuses.ends_with(&[
        ClaimStatus::Accepted,
        ClaimStatus::Pending,
        ClaimStatus::Paid
    ]));
}

// ============================================================================
// Coordination of benefits
// ============================================================================

#[tokio::test]
async fn test_secondary_claim_bills_remaining_balance_and_reconciles() {
    let service = create_test_service();
    let primary = pending_claim(&service, None, &[dec!(130), dec!(20)]).await;
    let (first_line, second_line) = (primary.line_items[0].id, primary.line_items[1].id);

    let mut alloc = allocation(first_line, dec!(80));
    alloc.patient_responsibility = dec!(50);
    service
        .post_payment(primary.id, payment(dec!(80), vec![alloc]), &biller())
        .await
        .unwrap();
    let denied = service
        .record_denial(
            primary.id,
            DenialRequest {
                line_item_id: Some(second_line),
                code: "CO-96".to_string(),
                reason: "Non-covered charge".to_string(),
                category: DenialCategory::NotCovered,
                denial_date: None,
            },
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(denied.claim.status, ClaimStatus::PartialPaid);

    let candidates = service.find_secondary_candidates().await.unwrap();
    assert!(candidates.iter().any(|c| c.claim_id == primary.id));

    let secondary = service
        .derive_secondary_claim(
            primary.id,
            SecondaryPayerInfo {
                payer: payer(PayerRank::Secondary, "MEDIGAP"),
                billable_denied_amount: dec!(20),
                notes: None,
            },
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(secondary.status, ClaimStatus::Draft);
    assert_eq!(secondary.financials.total_charges, dec!(70));
    assert_eq!(secondary.cob.as_ref().map(|c| c.source_claim_id), Some(primary.id));
    assert!(service.find_secondary_candidates().await.unwrap().is_empty());

    let err = service
        .derive_secondary_claim(
            primary.id,
            SecondaryPayerInfo {
                payer: payer(PayerRank::Secondary, "OTHER"),
                billable_denied_amount: Decimal::ZERO,
                notes: None,
            },
            &biller(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.violation(), Some(Violation::SecondaryAlreadyExists { .. })));

    service.mark_ready_to_submit(secondary.id, &biller()).await.unwrap();
    service.submit_claim(secondary.id, None, &biller()).await.unwrap();
    let allocations = secondary
        .line_items
        .iter()
        .map(|l| allocation(l.id, l.line_total))
        .collect();
    let outcome = service
        .ingest_payer_response(
            secondary.id,
            response(
                "1",
                Some(Remittance {
                    payment: Some(payment(dec!(70), allocations)),
                    denials: Vec::new(),
                }),
            ),
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.claim.status, ClaimStatus::Paid);

    let reports = service.reconcile_claim(secondary.id).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_balanced());
    assert_eq!(reports[0].source_paid + reports[0].derived_paid, dec!(150));
    assert!(service.list_discrepancies().await.unwrap().is_empty());

    let primary_history = service.claim_history(primary.id).await.unwrap();
    assert!(primary_history
        .iter()
        .any(|e| e.action == ClaimAction::SecondaryDerived));
    assert!(service.verify_history(primary.id).await.unwrap().valid);
    assert!(service.verify_history(secondary.id).await.unwrap().valid);
}

#[tokio::test]
async fn test_secondary_refused_before_adjudication() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(100)]).await;
    let err = service
        .derive_secondary_claim(
            claim.id,
            SecondaryPayerInfo {
                payer: payer(PayerRank::Secondary, "MEDIGAP"),
                billable_denied_amount: Decimal::ZERO,
                notes: None,
            },
            &biller(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.violation(),
        Some(Violation::SecondaryNotAllowed { status: ClaimStatus::Pending })
    ));
}

#[tokio::test]
async fn test_late_primary_responsibility_is_reported_as_discrepancy() {
    let service = create_test_service();
    let primary = pending_claim(&service, None, &[dec!(100), dec!(50)]).await;
    let (first_line, second_line) = (primary.line_items[0].id, primary.line_items[1].id);

    let mut first = allocation(first_line, dec!(60));
    first.patient_responsibility = dec!(40);
    service
        .post_payment(primary.id, payment(dec!(60), vec![first]), &biller())
        .await
        .unwrap();

    let secondary = service
        .derive_secondary_claim(
            primary.id,
            SecondaryPayerInfo {
                payer: payer(PayerRank::Secondary, "MEDIGAP"),
                billable_denied_amount: Decimal::ZERO,
                notes: None,
            },
            &biller(),
        )
        .await
        .unwrap();
    assert_eq!(secondary.financials.total_charges, dec!(40));
    assert!(service.list_discrepancies().await.unwrap().is_empty());

    // The primary assigns more patient responsibility after the secondary
    // was billed, so the pair no longer accounts for every charge.
    let mut second = allocation(second_line, dec!(30));
    second.patient_responsibility = dec!(20);
    let settled = service
        .post_payment(primary.id, payment(dec!(30), vec![second]), &biller())
        .await
        .unwrap();
    assert_eq!(settled.claim.status, ClaimStatus::Paid);

    let discrepancies = service.list_discrepancies().await.unwrap();
    assert_eq!(discrepancies.len(), 1);
    let report = &discrepancies[0].report;
    assert_eq!(discrepancies[0].trigger_claim_id, primary.id);
    assert_eq!(report.source_claim_id, primary.id);
    assert_eq!(report.derived_claim_id, secondary.id);
    assert_eq!(report.discrepancy, dec!(20));
    assert!(!report.is_balanced());

    // Reported, never corrected
    let primary_after = service.get_claim(primary.id).await.unwrap();
    assert_eq!(primary_after.status, ClaimStatus::Paid);
    assert_eq!(primary_after.version, settled.claim.version);
    assert_eq!(primary_after.financials, settled.claim.financials);
    let secondary_after = service.get_claim(secondary.id).await.unwrap();
    assert_eq!(secondary_after.financials.total_charges, dec!(40));
    assert_eq!(secondary_after.status, ClaimStatus::Draft);
}

// ============================================================================
// Workflow history
// ============================================================================

#[tokio::test]
async fn test_history_reads_only_grow() {
    let service = create_test_service();
    let claim = pending_claim(&service, None, &[dec!(150)]).await;
    let earlier = service.claim_history(claim.id).await.unwrap();

    let mut alloc = allocation(claim.line_items[0].id, dec!(80));
    alloc.allowed_amount = Some(dec!(120));
    service
        .post_payment(claim.id, payment(dec!(80), vec![alloc]), &biller())
        .await
        .unwrap();
    service
        .post_payment(
            claim.id,
            payment(dec!(40), vec![allocation(claim.line_items[0].id, dec!(40))]),
            &biller(),
        )
        .await
        .unwrap();
    let later = service.claim_history(claim.id).await.unwrap();

    assert!(later.len() > earlier.len());
    assert_eq!(&later[..earlier.len()], &earlier[..]);
    for (index, entry) in later.iter().enumerate() {
        assert_eq!(entry.sequence, index as u64 + 1);
    }
    assert_eq!(later[earlier.len()].prev_hash, earlier[earlier.len() - 1].entry_hash);
    assert!(service.verify_history(claim.id).await.unwrap().valid);
}

// ============================================================================
// Transport and concurrency
// ============================================================================

struct FlakyTransport {
    available: AtomicBool,
}

#[async_trait]
impl ClaimTransport for FlakyTransport {
    async fn transmit(
        &self,
        _claim: &Claim,
        _method: SubmissionMethod,
    ) -> Result<SubmissionReceipt, TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(SubmissionReceipt {
                payer_control_number: Some("PCN-5512".to_string()),
                transmitted_at: Utc::now(),
            })
        } else {
            Err(TransportError::Unavailable("clearinghouse offline".to_string()))
        }
    }
}

#[tokio::test]
async fn test_failed_transmission_leaves_claim_queued() {
    let transport = Arc::new(FlakyTransport {
        available: AtomicBool::new(false),
    });
    let service = ClaimsService::new(
        Arc::new(InMemoryClaimRepository::new()),
        transport.clone(),
        ClaimsConfig::default(),
    )
    .unwrap();
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    service
        .add_line_item(claim.id, line("99213", dec!(100)), &biller())
        .await
        .unwrap();
    service.mark_ready_to_submit(claim.id, &biller()).await.unwrap();

    let err = service.submit_claim(claim.id, None, &biller()).await.unwrap_err();
    assert!(err.is_retryable());
    let queued = service.get_claim(claim.id).await.unwrap();
    assert_eq!(queued.status, ClaimStatus::Queued);
    assert_eq!(queued.submission_attempts, 1);

    transport.available.store(true, Ordering::SeqCst);
    let submitted = service.submit_claim(claim.id, None, &biller()).await.unwrap();
    assert_eq!(submitted.status, ClaimStatus::Submitted);
    assert_eq!(submitted.submission_attempts, 1);
    assert_eq!(submitted.claim_number, queued.claim_number);
    assert_eq!(
        submitted
            .submission
            .as_ref()
            .and_then(|s| s.payer_control_number.as_deref()),
        Some("PCN-5512")
    );
}

/// Repository that loses the version race a set number of times.
struct ContendedRepository {
    inner: InMemoryClaimRepository,
    conflicts: AtomicU32,
}

#[async_trait]
impl ClaimRepository for ContendedRepository {
    async fn commit_all(&self, commits: Vec<ClaimCommit>) -> ClaimsResult<()> {
        let updating = commits.iter().find_map(|c| c.expected_version.map(|v| (c.claim.id, v)));
        if let Some((claim_id, expected)) = updating {
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ClaimsError::Conflict { claim_id, expected });
            }
        }
        self.inner.commit_all(commits).await
    }

    async fn get_claim(&self, claim_id: Uuid) -> ClaimsResult<Option<Claim>> {
        self.inner.get_claim(claim_id).await
    }

    async fn list_claims(&self, filter: &ClaimFilter) -> ClaimsResult<Vec<Claim>> {
        self.inner.list_claims(filter).await
    }

    async fn find_derived_claims(&self, source_claim_id: Uuid) -> ClaimsResult<Vec<Claim>> {
        self.inner.find_derived_claims(source_claim_id).await
    }

    async fn list_postings(&self, claim_id: Uuid) -> ClaimsResult<Vec<PaymentPosting>> {
        self.inner.list_postings(claim_id).await
    }

    async fn get_denial(&self, denial_id: Uuid) -> ClaimsResult<Option<ClaimDenial>> {
        self.inner.get_denial(denial_id).await
    }

    async fn list_denials(&self, claim_id: Uuid) -> ClaimsResult<Vec<ClaimDenial>> {
        self.inner.list_denials(claim_id).await
    }

    async fn history(&self, claim_id: Uuid) -> ClaimsResult<Vec<WorkflowHistoryEntry>> {
        self.inner.history(claim_id).await
    }

    async fn record_discrepancy(&self, discrepancy: &ReconciliationDiscrepancy) -> ClaimsResult<()> {
        self.inner.record_discrepancy(discrepancy).await
    }

    async fn list_discrepancies(&self) -> ClaimsResult<Vec<ReconciliationDiscrepancy>> {
        self.inner.list_discrepancies().await
    }
}

fn contended_service(conflicts: u32) -> (Arc<ContendedRepository>, ClaimsService) {
    let repo = Arc::new(ContendedRepository {
        inner: InMemoryClaimRepository::new(),
        conflicts: AtomicU32::new(0),
    });
    let service = ClaimsService::new(repo.clone(), Arc::new(ManualTransport), ClaimsConfig::default())
        .unwrap();
    repo.conflicts.store(conflicts, Ordering::SeqCst);
    (repo, service)
}

#[tokio::test]
async fn test_mutation_replayed_after_version_conflict() {
    let (repo, service) = contended_service(0);
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    repo.conflicts.store(2, Ordering::SeqCst);

    let (updated, _) = service
        .add_line_item(claim.id, line("99213", dec!(100)), &biller())
        .await
        .unwrap();
    assert_eq!(updated.line_items.len(), 1);
    assert_eq!(updated.version, claim.version + 1);
    assert_eq!(service.claim_history(claim.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_conflict_surfaces_after_retries_exhausted() {
    let (repo, service) = contended_service(0);
    let claim = service.create_claim(new_claim(), &biller()).await.unwrap();
    repo.conflicts.store(10, Ordering::SeqCst);

    let err = service
        .add_line_item(claim.id, line("99213", dec!(100)), &biller())
        .await
        .unwrap_err();
    assert!(matches!(err, ClaimsError::Conflict { .. }));
    assert!(service.get_claim(claim.id).await.unwrap().line_items.is_empty());
}

#[tokio::test]
async fn test_concurrent_postings_respect_line_cap() {
    let service = Arc::new(create_test_service());
    let claim = pending_claim(&service, None, &[dec!(100)]).await;
    let (claim_id, line_id) = (claim.id, claim.line_items[0].id);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .post_payment(claim_id, payment(dec!(40), vec![allocation(line_id, dec!(40))]), &biller())
                .await
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 2);
    let stored = service.get_claim(claim_id).await.unwrap();
    assert_eq!(stored.line_items[0].paid_amount, dec!(80));
    assert!(service.verify_history(claim_id).await.unwrap().valid);
}

// ============================================================================
// Reporting
// ============================================================================

#[tokio::test]
async fn test_summary_and_stale_submissions() {
    let service = create_test_service();
    let paid = pending_claim(&service, None, &[dec!(100)]).await;
    service
        .post_payment(
            paid.id,
            payment(dec!(100), vec![allocation(paid.line_items[0].id, dec!(100))]),
            &biller(),
        )
        .await
        .unwrap();

    let waiting = service.create_claim(new_claim(), &biller()).await.unwrap();
    service
        .add_line_item(waiting.id, line("99212", dec!(60)), &biller())
        .await
        .unwrap();
    service.mark_ready_to_submit(waiting.id, &biller()).await.unwrap();
    service.submit_claim(waiting.id, None, &biller()).await.unwrap();

    let summary = service.claims_summary(&ClaimFilter::default()).await.unwrap();
    assert_eq!(summary.claim_count, 2);
    assert_eq!(summary.total_charges, dec!(160));
    assert_eq!(summary.collections, dec!(100));
    assert_eq!(summary.by_status.get(&ClaimStatus::Paid), Some(&1));

    let later = Utc::now() + chrono::Duration::hours(100);
    let stale = service.find_stale_submissions(later).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].claim_id, waiting.id);
    assert!(service.find_stale_submissions(Utc::now()).await.unwrap().is_empty());
}
