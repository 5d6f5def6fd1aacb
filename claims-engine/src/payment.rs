//! Payment posting and allocation.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::Violation;
use crate::models::{Actor, Claim, LineItemStatus};

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Eft,
    Check,
    Ach,
    Wire,
    VirtualCard,
    Cash,
    CreditCard,
    DebitCard,
    Other,
}

/// Payment type (what it's for)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    #[default]
    InsurancePayment,
    PatientPayment,
    Adjustment,
    Refund,
    Transfer,
    /// Compensating entry written when a claim with applied money is voided
    Reversal,
    Other,
}

/// Portion of a payment applied to one line item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub line_item_id: Uuid,
    #[serde(default)]
    pub paid_amount: Decimal,
    #[serde(default)]
    pub adjustment_amount: Decimal,
    #[serde(default)]
    pub patient_responsibility: Decimal,
    /// Payer allowed amount, when the remittance reports one
    pub allowed_amount: Option<Decimal>,
    pub notes: Option<String>,
}

/// Payment received against a claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    #[serde(default)]
    pub method: PaymentMethod,
    #[serde(default)]
    pub payment_type: PaymentType,
    pub check_number: Option<String>,
    pub check_date: Option<NaiveDate>,
    pub reference_number: Option<String>,
    /// Remittance trace (check or EFT trace) number; postings are idempotent on it
    pub trace_number: Option<String>,
    #[serde(default)]
    pub allocations: Vec<AllocationRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: Uuid,
    pub line_item_id: Uuid,
    pub line_number: u32,
    pub allocated_amount: Decimal,
    pub adjustment_amount: Decimal,
    pub patient_responsibility: Decimal,
    pub allowed_amount: Option<Decimal>,
    pub notes: Option<String>,
}

/// Immutable record of a posted payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPosting {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub payment_amount: Decimal,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub check_number: Option<String>,
    pub check_date: Option<NaiveDate>,
    pub reference_number: Option<String>,
    pub trace_number: Option<String>,
    pub allocations: Vec<PaymentAllocation>,
    pub allocated_amount: Decimal,
    pub unallocated_amount: Decimal,
    pub notes: Option<String>,
    pub posted_by: Actor,
    pub posted_at: DateTime<Utc>,
}

fn non_negative(value: Decimal, field: &'static str) -> Result<(), Violation> {
    if value < Decimal::ZERO {
        Err(Violation::NegativeAmount { field })
    } else {
        Ok(())
    }
}

/// Check a payment against the claim ledger and previously posted payments.
/// Nothing is mutated; a request that passes can be applied in full.
pub fn validate_payment(
    claim: &Claim,
    prior_postings: &[PaymentPosting],
    request: &PaymentRequest,
) -> Result<(), Violation> {
    non_negative(request.amount, "payment amount")?;

    if let Some(trace) = request.trace_number.as_deref().map(str::trim) {
        if !trace.is_empty()
            && prior_postings
                .iter()
                .any(|p| p.trace_number.as_deref() == Some(trace))
        {
            return Err(Violation::DuplicateRemittance {
                trace_number: trace.to_string(),
            });
        }
    }

    let mut seen = HashSet::new();
    let mut allocated = Decimal::ZERO;
    for allocation in &request.allocations {
        let line = claim.line(allocation.line_item_id)?;
        if !seen.insert(line.id) {
            return Err(Violation::DuplicateAllocation {
                line_number: line.line_number,
            });
        }
        if line.status == LineItemStatus::Denied {
            return Err(Violation::LineDenied {
                line_number: line.line_number,
            });
        }
        non_negative(allocation.paid_amount, "paid amount")?;
        non_negative(allocation.adjustment_amount, "adjustment amount")?;
        non_negative(allocation.patient_responsibility, "patient responsibility")?;

        let applied = line.applied()
            + allocation.paid_amount
            + allocation.adjustment_amount
            + allocation.patient_responsibility;
        let cap = match allocation.allowed_amount {
            Some(allowed) => {
                non_negative(allowed, "allowed amount")?;
                if allowed > line.line_total {
                    return Err(Violation::AllowedExceedsCharge {
                        line_number: line.line_number,
                        allowed,
                        line_total: line.line_total,
                    });
                }
                allowed
            }
            None => line.effective_allowed(),
        };
        if applied > cap {
            return Err(Violation::AllocationExceedsAllowed {
                line_number: line.line_number,
                applied,
                cap,
            });
        }
        allocated += allocation.paid_amount;
    }

    if allocated > request.amount {
        return Err(Violation::AllocationsExceedPayment {
            allocated,
            payment: request.amount,
        });
    }
    Ok(())
}

/// Apply a validated payment to the claim ledger. Amounts are added to what
/// the lines already carry, never overwritten.
pub fn apply_payment(
    claim: &mut Claim,
    request: &PaymentRequest,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<PaymentPosting, Violation> {
    let mut allocations = Vec::with_capacity(request.allocations.len());
    for allocation in &request.allocations {
        let line = claim.line_mut(allocation.line_item_id)?;
        if let Some(allowed) = allocation.allowed_amount {
            line.allowed_amount = Some(allowed);
        }
        line.paid_amount += allocation.paid_amount;
        line.adjustment_amount += allocation.adjustment_amount;
        line.patient_responsibility += allocation.patient_responsibility;
        line.updated_at = now;
        line.refresh_status();

        allocations.push(PaymentAllocation {
            id: Uuid::new_v4(),
            line_item_id: line.id,
            line_number: line.line_number,
            allocated_amount: allocation.paid_amount,
            adjustment_amount: allocation.adjustment_amount,
            patient_responsibility: allocation.patient_responsibility,
            allowed_amount: allocation.allowed_amount,
            notes: allocation.notes.clone(),
        });
    }
    claim.recompute_financials();

    let allocated: Decimal = allocations.iter().map(|a| a.allocated_amount).sum();
    Ok(PaymentPosting {
        id: Uuid::new_v4(),
        claim_id: claim.id,
        payment_amount: request.amount,
        payment_date: request.payment_date,
        method: request.method,
        payment_type: request.payment_type,
        check_number: request.check_number.clone(),
        check_date: request.check_date,
        reference_number: request.reference_number.clone(),
        trace_number: request
            .trace_number
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        allocations,
        allocated_amount: allocated,
        unallocated_amount: request.amount - allocated,
        notes: request.notes.clone(),
        posted_by: actor.clone(),
        posted_at: now,
    })
}

/// Back out every amount applied to the claim. Used when voiding a claim
/// that already carries money; the posting mirrors the applied amounts with
/// negative values so the ledger nets to zero.
pub fn reverse_applied(
    claim: &mut Claim,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Option<PaymentPosting> {
    if !claim.has_applied_money() {
        return None;
    }
    let mut allocations = Vec::new();
    for line in claim.line_items.iter_mut().filter(|l| l.has_activity()) {
        allocations.push(PaymentAllocation {
            id: Uuid::new_v4(),
            line_item_id: line.id,
            line_number: line.line_number,
            allocated_amount: -line.paid_amount,
            adjustment_amount: -line.adjustment_amount,
            patient_responsibility: -line.patient_responsibility,
            allowed_amount: None,
            notes: None,
        });
        line.paid_amount = Decimal::ZERO;
        line.adjustment_amount = Decimal::ZERO;
        line.patient_responsibility = Decimal::ZERO;
        line.updated_at = now;
        line.refresh_status();
    }
    claim.recompute_financials();

    let reversed: Decimal = allocations.iter().map(|a| a.allocated_amount).sum();
    Some(PaymentPosting {
        id: Uuid::new_v4(),
        claim_id: claim.id,
        payment_amount: reversed,
        payment_date: now.date_naive(),
        method: PaymentMethod::Other,
        payment_type: PaymentType::Reversal,
        check_number: None,
        check_date: None,
        reference_number: None,
        trace_number: None,
        allocations,
        allocated_amount: reversed,
        unallocated_amount: Decimal::ZERO,
        notes: Some("void reversal".to_string()),
        posted_by: actor.clone(),
        posted_at: now,
    })
}
