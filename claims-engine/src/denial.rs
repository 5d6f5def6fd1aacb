//! Denials and the appeal workflow.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Violation;
use crate::models::{Actor, Claim, LineItemStatus};

/// Denial category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DenialCategory {
    NotCovered,
    PriorAuthorization,
    Duplicate,
    TimelyFiling,
    LimitExceeded,
    MissingInformation,
    Eligibility,
    MedicalNecessity,
    Coding,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppealStatus {
    #[default]
    NotAppealed,
    AppealSubmitted,
    AppealUnderReview,
    AppealApproved,
    AppealDenied,
    AppealWithdrawn,
}

impl AppealStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAppealed => "not_appealed",
            Self::AppealSubmitted => "appeal_submitted",
            Self::AppealUnderReview => "appeal_under_review",
            Self::AppealApproved => "appeal_approved",
            Self::AppealDenied => "appeal_denied",
            Self::AppealWithdrawn => "appeal_withdrawn",
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, Self::AppealSubmitted | Self::AppealUnderReview)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::AppealApproved | Self::AppealDenied | Self::AppealWithdrawn
        )
    }

    pub fn can_transition_to(self, to: AppealStatus) -> bool {
        use AppealStatus::*;
        match self {
            NotAppealed => to == AppealSubmitted,
            AppealSubmitted => matches!(
                to,
                AppealUnderReview | AppealApproved | AppealDenied | AppealWithdrawn
            ),
            AppealUnderReview => matches!(to, AppealApproved | AppealDenied | AppealWithdrawn),
            AppealApproved | AppealDenied | AppealWithdrawn => false,
        }
    }

    fn ensure_transition(self, to: AppealStatus) -> Result<(), Violation> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Violation::AppealTransition { from: self, to })
        }
    }
}

impl fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final word from the payer on an appeal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppealOutcome {
    Approved,
    Denied,
    Withdrawn,
}

impl From<AppealOutcome> for AppealStatus {
    fn from(outcome: AppealOutcome) -> Self {
        match outcome {
            AppealOutcome::Approved => AppealStatus::AppealApproved,
            AppealOutcome::Denied => AppealStatus::AppealDenied,
            AppealOutcome::Withdrawn => AppealStatus::AppealWithdrawn,
        }
    }
}

/// Denial reported by the payer, for one line or the whole claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialRequest {
    /// None denies every unsatisfied line on the claim
    pub line_item_id: Option<Uuid>,
    pub code: String,
    pub reason: String,
    #[serde(default)]
    pub category: DenialCategory,
    pub denial_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDenial {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub line_item_id: Option<Uuid>,
    pub line_number: Option<u32>,
    pub denial_code: String,
    pub denial_reason: String,
    pub denial_category: DenialCategory,
    pub denial_date: NaiveDate,
    pub denied_amount: Decimal,
    pub appeal_status: AppealStatus,
    pub appeal_submitted_at: Option<DateTime<Utc>>,
    pub appeal_response_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ClaimDenial {
    /// A denial stays in effect until an appeal overturns it.
    pub fn is_in_effect(&self) -> bool {
        self.appeal_status != AppealStatus::AppealApproved
    }

    pub fn file_appeal(&mut self, now: DateTime<Utc>) -> Result<(), Violation> {
        self.appeal_status
            .ensure_transition(AppealStatus::AppealSubmitted)?;
        self.appeal_status = AppealStatus::AppealSubmitted;
        self.appeal_submitted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn begin_review(&mut self, now: DateTime<Utc>) -> Result<(), Violation> {
        self.appeal_status
            .ensure_transition(AppealStatus::AppealUnderReview)?;
        self.appeal_status = AppealStatus::AppealUnderReview;
        self.updated_at = now;
        Ok(())
    }

    /// Record the appeal outcome. Resolution fields are only ever set here.
    pub fn resolve(
        &mut self,
        outcome: AppealOutcome,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), Violation> {
        let to = AppealStatus::from(outcome);
        self.appeal_status.ensure_transition(to)?;
        self.appeal_status = to;
        self.appeal_response_at = Some(now);
        self.resolved = true;
        self.resolved_at = Some(now);
        self.resolution_notes = notes;
        self.updated_at = now;
        Ok(())
    }
}

/// Record a denial against the claim ledger. A line denial marks that line;
/// a claim-level denial marks every line still carrying a balance.
pub fn record_denial(
    claim: &mut Claim,
    request: &DenialRequest,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<ClaimDenial, Violation> {
    let code = request.code.trim();
    if code.is_empty() {
        return Err(Violation::MissingField {
            field: "denial code",
        });
    }
    if request.reason.trim().is_empty() {
        return Err(Violation::MissingField {
            field: "denial reason",
        });
    }

    let denial_id = Uuid::new_v4();
    let (line_number, denied_amount) = match request.line_item_id {
        Some(line_item_id) => {
            let line = claim.line_mut(line_item_id)?;
            if line.status == LineItemStatus::Denied {
                return Err(Violation::LineAlreadyDenied {
                    line_number: line.line_number,
                });
            }
            if line.is_satisfied() {
                return Err(Violation::LineAlreadySatisfied {
                    line_number: line.line_number,
                });
            }
            let amount = line.outstanding();
            line.status = LineItemStatus::Denied;
            line.denial_id = Some(denial_id);
            line.updated_at = now;
            (Some(line.line_number), amount)
        }
        None => {
            let mut amount = Decimal::ZERO;
            let mut touched = 0usize;
            for line in claim
                .line_items
                .iter_mut()
                .filter(|l| l.status != LineItemStatus::Denied && !l.is_satisfied())
            {
                amount += line.outstanding();
                line.status = LineItemStatus::Denied;
                line.denial_id = Some(denial_id);
                line.updated_at = now;
                touched += 1;
            }
            if touched == 0 {
                return Err(Violation::NothingToDeny);
            }
            (None, amount)
        }
    };
    claim.recompute_financials();

    Ok(ClaimDenial {
        id: denial_id,
        claim_id: claim.id,
        line_item_id: request.line_item_id,
        line_number,
        denial_code: code.to_string(),
        denial_reason: request.reason.trim().to_string(),
        denial_category: request.category,
        denial_date: request.denial_date.unwrap_or_else(|| now.date_naive()),
        denied_amount,
        appeal_status: AppealStatus::NotAppealed,
        appeal_submitted_at: None,
        appeal_response_at: None,
        resolved: false,
        resolved_at: None,
        resolution_notes: None,
        created_by: actor.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Reopen the lines an approved appeal overturned.
pub fn reopen_lines(claim: &mut Claim, denial_id: Uuid, now: DateTime<Utc>) {
    for line in claim
        .line_items
        .iter_mut()
        .filter(|l| l.denial_id == Some(denial_id))
    {
        line.status = LineItemStatus::Pending;
        line.denial_id = None;
        line.updated_at = now;
        line.refresh_status();
    }
    claim.recompute_financials();
}
