//! Work queues derived from claim state: submissions the payer has not
//! answered, and adjudicated claims that still leave a balance for the
//! next payer.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{Claim, ClaimStatus, PayerRank};

#[derive(Debug, Clone, Serialize)]
pub struct StaleSubmission {
    pub claim_id: Uuid,
    pub claim_number: Option<String>,
    pub payer_id: String,
    pub submitted_at: DateTime<Utc>,
    pub hours_waiting: i64,
}

/// Submitted claims with no payer response inside the window.
pub fn stale_submissions(
    claims: &[Claim],
    as_of: DateTime<Utc>,
    window: Duration,
) -> Vec<StaleSubmission> {
    claims
        .iter()
        .filter(|c| c.status == ClaimStatus::Submitted)
        .filter_map(|c| {
            let submission = c.submission.as_ref()?;
            let answered = c
                .payer_response
                .as_ref()
                .is_some_and(|r| r.received_at >= submission.submitted_at);
            let waited = as_of - submission.submitted_at;
            (!answered && waited > window).then(|| StaleSubmission {
                claim_id: c.id,
                claim_number: c.claim_number.clone(),
                payer_id: c.payer.payer_id.clone(),
                submitted_at: submission.submitted_at,
                hours_waiting: waited.num_hours(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SecondaryCandidate {
    pub claim_id: Uuid,
    pub claim_number: Option<String>,
    pub patient_ref: String,
    pub status: ClaimStatus,
    pub next_rank: PayerRank,
    pub patient_responsibility: Decimal,
    pub denied_balance: Decimal,
}

/// Adjudicated claims with a balance another payer could pick up and no
/// live claim at the next rank yet.
pub fn secondary_candidates(claims: &[Claim]) -> Vec<SecondaryCandidate> {
    let billed: HashSet<Uuid> = claims
        .iter()
        .filter(|c| !matches!(c.status, ClaimStatus::Cancelled | ClaimStatus::Voided))
        .filter_map(|c| c.cob.as_ref().map(|cob| cob.source_claim_id))
        .collect();

    claims
        .iter()
        .filter(|c| c.status.is_adjudicated() && !billed.contains(&c.id))
        .filter_map(|c| {
            let next_rank = c.payer.rank.next()?;
            let denied_balance = c.denied_balance();
            let patient_responsibility = c.financials.patient_responsibility;
            (patient_responsibility + denied_balance > Decimal::ZERO).then(|| SecondaryCandidate {
                claim_id: c.id,
                claim_number: c.claim_number.clone(),
                patient_ref: c.patient_ref.clone(),
                status: c.status,
                next_rank,
                patient_responsibility,
                denied_balance,
            })
        })
        .collect()
}
