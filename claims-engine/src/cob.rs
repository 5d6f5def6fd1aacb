//! Coordination of benefits: billing the next payer and reconciling the pair.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Violation;
use crate::history::GENESIS_HASH;
use crate::ledger::line_total;
use crate::models::{
    Actor, AuditStamp, Claim, ClaimLineItem, ClaimStatus, FinancialSummary, LineItemStatus,
    PayerContext,
};

/// Coverage to bill once the source claim is adjudicated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryPayerInfo {
    pub payer: PayerContext,
    /// Portion of the source claim's denied balance the next payer may cover
    #[serde(default)]
    pub billable_denied_amount: Decimal,
    pub notes: Option<String>,
}

/// Link from a derived claim back to the claim it was billed from. The
/// source amounts are a snapshot taken at derivation and never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationOfBenefits {
    pub source_claim_id: Uuid,
    pub source_total_charges: Decimal,
    pub source_paid_amount: Decimal,
    pub source_denied_amount: Decimal,
    pub source_patient_responsibility: Decimal,
    pub billable_denied_amount: Decimal,
    pub secondary_charges: Decimal,
}

fn blocks_rank(claim: &Claim) -> bool {
    !matches!(claim.status, ClaimStatus::Cancelled | ClaimStatus::Voided)
}

/// Build the next-rank claim from an adjudicated source claim. Each line
/// carries the patient responsibility the source payer left plus any share
/// of the billable denied amount, allocated to denied lines in line order.
pub fn derive_secondary(
    source: &Claim,
    info: &SecondaryPayerInfo,
    existing_derived: &[Claim],
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Claim, Violation> {
    if !source.status.is_adjudicated() {
        return Err(Violation::SecondaryNotAllowed {
            status: source.status,
        });
    }
    let expected = source.payer.rank.next().ok_or(Violation::NoFurtherPayerRank)?;
    if info.payer.rank != expected {
        return Err(Violation::InvalidSecondaryRank {
            expected: expected.to_string(),
            requested: info.payer.rank.to_string(),
        });
    }
    if existing_derived
        .iter()
        .any(|c| c.payer.rank == expected && blocks_rank(c))
    {
        return Err(Violation::SecondaryAlreadyExists {
            rank: expected.to_string(),
        });
    }
    if info.payer.payer_id.trim().is_empty() {
        return Err(Violation::MissingField { field: "payer_id" });
    }
    if info.billable_denied_amount < Decimal::ZERO {
        return Err(Violation::NegativeAmount {
            field: "billable denied amount",
        });
    }
    let denied = source.denied_balance();
    if info.billable_denied_amount > denied {
        return Err(Violation::BillableDeniedExceedsDenied {
            requested: info.billable_denied_amount,
            available: denied,
        });
    }

    let mut remaining = info.billable_denied_amount;
    let mut lines = Vec::new();
    for line in &source.line_items {
        let denied_share = if line.status == LineItemStatus::Denied {
            let share = line.outstanding().min(remaining);
            remaining -= share;
            share
        } else {
            Decimal::ZERO
        };
        let charge = line.patient_responsibility + denied_share;
        if charge <= Decimal::ZERO {
            continue;
        }
        let line_number = u32::try_from(lines.len()).unwrap_or(u32::MAX).saturating_add(1);
        lines.push(ClaimLineItem {
            id: Uuid::new_v4(),
            line_number,
            service_date: line.service_date,
            place_of_service_code: line.place_of_service_code.clone(),
            procedure_code: line.procedure_code.clone(),
            modifier: line.modifier.clone(),
            description: line.description.clone(),
            diagnosis_pointers: line.diagnosis_pointers.clone(),
            units: Decimal::ONE,
            unit_charge: charge,
            line_total: line_total(Decimal::ONE, charge),
            allowed_amount: None,
            paid_amount: Decimal::ZERO,
            adjustment_amount: Decimal::ZERO,
            patient_responsibility: Decimal::ZERO,
            status: LineItemStatus::Pending,
            denial_id: None,
            created_at: now,
            updated_at: now,
        });
    }
    if lines.is_empty() {
        return Err(Violation::NoSecondaryBalance);
    }
    let secondary_charges: Decimal = lines.iter().map(|l| l.line_total).sum();

    let mut claim = Claim {
        id: Uuid::new_v4(),
        claim_number: None,
        version: 0,
        patient_ref: source.patient_ref.clone(),
        visit_ref: source.visit_ref.clone(),
        rendering_provider_ref: source.rendering_provider_ref.clone(),
        billing_provider_ref: source.billing_provider_ref.clone(),
        facility_ref: source.facility_ref.clone(),
        payer: info.payer.clone(),
        claim_type: source.claim_type,
        place_of_service_code: source.place_of_service_code.clone(),
        service_date_start: source.service_date_start,
        service_date_end: source.service_date_end,
        diagnosis_codes: source.diagnosis_codes.clone(),
        principal_diagnosis: source.principal_diagnosis.clone(),
        line_items: lines,
        financials: FinancialSummary::default(),
        status: ClaimStatus::Draft,
        submission_attempts: 0,
        submission: None,
        payer_response: None,
        payment: None,
        denial: None,
        cob: Some(CoordinationOfBenefits {
            source_claim_id: source.id,
            source_total_charges: source.financials.total_charges,
            source_paid_amount: source.financials.amount_paid,
            source_denied_amount: denied,
            source_patient_responsibility: source.financials.patient_responsibility,
            billable_denied_amount: info.billable_denied_amount,
            secondary_charges,
        }),
        ingested_responses: Vec::new(),
        history_sequence: 0,
        history_head: GENESIS_HASH.to_string(),
        notes: info.notes.clone(),
        audit: AuditStamp {
            created_by: actor.clone(),
            created_at: now,
            updated_by: actor.clone(),
            updated_at: now,
        },
    };
    claim.recompute_financials();
    Ok(claim)
}

/// Where the original charges of a source/derived claim pair ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub source_claim_id: Uuid,
    pub derived_claim_id: Uuid,
    pub original_total_charges: Decimal,
    pub source_paid: Decimal,
    pub derived_paid: Decimal,
    pub final_patient_responsibility: Decimal,
    pub adjustments_and_write_offs: Decimal,
    pub unrecovered_denials: Decimal,
    pub outstanding: Decimal,
    /// Charges not accounted for by any bucket above; zero when balanced
    pub discrepancy: Decimal,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.discrepancy.is_zero()
    }
}

/// Account for the source claim's charges across both payers. The
/// patient responsibility the source payer assigned and the billable denied
/// amount were rebilled to the derived claim, so only the derived claim's
/// patient responsibility is final.
pub fn reconcile(source: &Claim, derived: &Claim) -> ReconciliationReport {
    let billable_denied = derived
        .cob
        .as_ref()
        .map(|cob| cob.billable_denied_amount)
        .unwrap_or(Decimal::ZERO);

    let adjustments = source.financials.adjustments
        + source.financials.write_off
        + derived.financials.adjustments
        + derived.financials.write_off;
    let unrecovered_denials = (source.denied_balance() - billable_denied).max(Decimal::ZERO)
        + derived.denied_balance();
    let outstanding = source.open_balance() + derived.open_balance();

    let accounted = source.financials.amount_paid
        + derived.financials.amount_paid
        + derived.financials.patient_responsibility
        + adjustments
        + unrecovered_denials
        + outstanding;

    ReconciliationReport {
        source_claim_id: source.id,
        derived_claim_id: derived.id,
        original_total_charges: source.financials.total_charges,
        source_paid: source.financials.amount_paid,
        derived_paid: derived.financials.amount_paid,
        final_patient_responsibility: derived.financials.patient_responsibility,
        adjustments_and_write_offs: adjustments,
        unrecovered_denials,
        outstanding,
        discrepancy: source.financials.total_charges - accounted,
    }
}

/// Stored when a reconciliation does not balance. Never auto-corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    pub id: Uuid,
    /// Claim whose settlement triggered the check
    pub trigger_claim_id: Uuid,
    pub report: ReconciliationReport,
    pub detected_at: DateTime<Utc>,
}
