use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::denial::{ClaimDenial, DenialCategory};
use crate::models::{Claim, ClaimStatus};

/// Portfolio summary across a set of claims
#[derive(Debug, Clone, Serialize)]
pub struct ClaimsSummary {
    pub generated_at: DateTime<Utc>,
    pub claim_count: usize,
    pub by_status: BTreeMap<ClaimStatus, usize>,
    pub total_charges: Decimal,
    pub collections: Decimal,
    pub adjustments: Decimal,
    pub write_off: Decimal,
    pub patient_responsibility: Decimal,
    pub outstanding: Decimal,
    pub denied: Decimal,
    pub denials_by_category: BTreeMap<DenialCategory, DenialTally>,
    pub by_procedure: Vec<ProcedureRevenue>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DenialTally {
    pub count: usize,
    pub amount: Decimal,
}

/// Procedure-level revenue
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureRevenue {
    pub procedure_code: String,
    pub units: Decimal,
    pub total_charges: Decimal,
    pub collections: Decimal,
}

/// Summarise claims and their denials. Voided and cancelled claims are
/// counted by status but excluded from the money totals.
pub fn claims_summary(claims: &[Claim], denials: &[ClaimDenial]) -> ClaimsSummary {
    let mut by_status = BTreeMap::new();
    let mut by_procedure: BTreeMap<String, ProcedureRevenue> = BTreeMap::new();
    let mut summary = ClaimsSummary {
        generated_at: Utc::now(),
        claim_count: claims.len(),
        by_status: BTreeMap::new(),
        total_charges: Decimal::ZERO,
        collections: Decimal::ZERO,
        adjustments: Decimal::ZERO,
        write_off: Decimal::ZERO,
        patient_responsibility: Decimal::ZERO,
        outstanding: Decimal::ZERO,
        denied: Decimal::ZERO,
        denials_by_category: BTreeMap::new(),
        by_procedure: Vec::new(),
    };

    for claim in claims {
        *by_status.entry(claim.status).or_insert(0) += 1;
        if matches!(claim.status, ClaimStatus::Voided | ClaimStatus::Cancelled) {
            continue;
        }
        let f = &claim.financials;
        summary.total_charges += f.total_charges;
        summary.collections += f.amount_paid;
        summary.adjustments += f.adjustments;
        summary.write_off += f.write_off;
        summary.patient_responsibility += f.patient_responsibility;
        summary.outstanding += f.outstanding;
        summary.denied += claim.denied_balance();

        for line in &claim.line_items {
            let entry = by_procedure
                .entry(line.procedure_code.clone())
                .or_insert_with(|| ProcedureRevenue {
                    procedure_code: line.procedure_code.clone(),
                    units: Decimal::ZERO,
                    total_charges: Decimal::ZERO,
                    collections: Decimal::ZERO,
                });
            entry.units += line.units;
            entry.total_charges += line.line_total;
            entry.collections += line.paid_amount;
        }
    }

    for denial in denials.iter().filter(|d| d.is_in_effect()) {
        let tally = summary
            .denials_by_category
            .entry(denial.denial_category)
            .or_default();
        tally.count += 1;
        tally.amount += denial.denied_amount;
    }

    summary.by_status = by_status;
    summary.by_procedure = by_procedure.into_values().collect();
    summary
}
