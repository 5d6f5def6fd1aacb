use chrono::NaiveDate;
use error_common::codes;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::denial::AppealStatus;
use crate::models::ClaimStatus;

/// A domain rule that rejected an operation.
///
/// Violations are never partially applied: the claim, its ledger and its
/// history are left exactly as they were before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("claim has no line items")]
    NoLineItems,

    #[error("claim must carry at least one diagnosis code")]
    NoDiagnoses,

    #[error("claim carries {count} diagnosis codes, at most {max} are allowed")]
    TooManyDiagnoses { count: usize, max: usize },

    #[error("diagnosis code {code} is listed more than once")]
    DuplicateDiagnosis { code: String },

    #[error("diagnosis codes must not be blank")]
    BlankDiagnosisCode,

    #[error("principal diagnosis {code} is not among the claim diagnoses")]
    PrincipalDiagnosisNotListed { code: String },

    #[error("line item {line_number} has no diagnosis pointer")]
    MissingDiagnosisPointer { line_number: u32 },

    #[error("line item {line_number} points at diagnosis {pointer}, which the claim does not carry")]
    UnresolvedDiagnosisPointer { line_number: u32, pointer: u8 },

    #[error("line item procedure code must not be blank")]
    BlankProcedureCode,

    #[error("line item units must be greater than zero")]
    NonPositiveUnits,

    #[error("{field} must not be negative")]
    NegativeAmount { field: &'static str },

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("service end date {end} precedes start date {start}")]
    ServiceDatesReversed { start: NaiveDate, end: NaiveDate },

    #[error("illegal status transition from {from} to {to}")]
    IllegalTransition { from: ClaimStatus, to: ClaimStatus },

    #[error("claim in status {status} can no longer be edited")]
    ClaimNotEditable { status: ClaimStatus },

    #[error("cannot {operation} while claim is {status}")]
    OperationNotAllowed {
        operation: &'static str,
        status: ClaimStatus,
    },

    #[error("claim has no line item {line_item_id}")]
    UnknownLineItem { line_item_id: Uuid },

    #[error("line item {line_number}: paid + adjustment + patient responsibility ({applied}) exceeds allowed amount ({cap})")]
    AllocationExceedsAllowed {
        line_number: u32,
        applied: Decimal,
        cap: Decimal,
    },

    #[error("line item {line_number}: allowed amount ({allowed}) exceeds line total ({line_total})")]
    AllowedExceedsCharge {
        line_number: u32,
        allowed: Decimal,
        line_total: Decimal,
    },

    #[error("line item {line_number} is allocated more than once in the same posting")]
    DuplicateAllocation { line_number: u32 },

    #[error("line item {line_number} is denied; resolve the appeal before posting to it")]
    LineDenied { line_number: u32 },

    #[error("allocated amount ({allocated}) exceeds payment amount ({payment})")]
    AllocationsExceedPayment { allocated: Decimal, payment: Decimal },

    #[error("remittance trace number {trace_number} has already been posted to this claim")]
    DuplicateRemittance { trace_number: String },

    #[error("line item {line_number} has no outstanding balance to deny")]
    LineAlreadySatisfied { line_number: u32 },

    #[error("line item {line_number} is already denied")]
    LineAlreadyDenied { line_number: u32 },

    #[error("claim has no outstanding balance to deny")]
    NothingToDeny,

    #[error("appeal cannot move from {from} to {to}")]
    AppealTransition { from: AppealStatus, to: AppealStatus },

    #[error("a claim with applied payments cannot be cancelled; void it instead")]
    CancelAfterPayment,

    #[error("secondary billing requires an adjudicated claim, claim is {status}")]
    SecondaryNotAllowed { status: ClaimStatus },

    #[error("derived claim must be billed at rank {expected}, got {requested}")]
    InvalidSecondaryRank { expected: String, requested: String },

    #[error("claim is already billed to a payer at rank {rank}")]
    SecondaryAlreadyExists { rank: String },

    #[error("claim was billed at the last supported payer rank")]
    NoFurtherPayerRank,

    #[error("billable denied amount ({requested}) exceeds denied balance ({available})")]
    BillableDeniedExceedsDenied {
        requested: Decimal,
        available: Decimal,
    },

    #[error("claim leaves no balance to bill to the next payer")]
    NoSecondaryBalance,

    #[error("ledger invariant broken on line item {line_number}: {detail}")]
    LedgerInvariant { line_number: u32, detail: String },
}

impl Violation {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoDiagnoses
            | Self::TooManyDiagnoses { .. }
            | Self::DuplicateDiagnosis { .. }
            | Self::BlankDiagnosisCode
            | Self::PrincipalDiagnosisNotListed { .. }
            | Self::MissingDiagnosisPointer { .. }
            | Self::UnresolvedDiagnosisPointer { .. } => codes::validation::DIAGNOSIS_INVALID,
            Self::NoLineItems
            | Self::BlankProcedureCode
            | Self::NonPositiveUnits
            | Self::UnknownLineItem { .. } => codes::validation::LINE_ITEM_INVALID,
            Self::MissingField { .. } => codes::validation::MISSING_REQUIRED_FIELD,
            Self::ServiceDatesReversed { .. } => codes::validation::INVALID_INPUT,
            Self::NegativeAmount { .. } => codes::payment::INVALID_AMOUNT,
            Self::IllegalTransition { .. } => codes::lifecycle::ILLEGAL_TRANSITION,
            Self::ClaimNotEditable { .. } | Self::CancelAfterPayment => {
                codes::lifecycle::CLAIM_TERMINAL
            }
            Self::OperationNotAllowed { .. } => codes::lifecycle::PRECONDITION_FAILED,
            Self::AllocationExceedsAllowed { .. }
            | Self::AllowedExceedsCharge { .. }
            | Self::DuplicateAllocation { .. }
            | Self::LineDenied { .. }
            | Self::LedgerInvariant { .. } => codes::payment::ALLOCATION_EXCEEDS_ALLOWED,
            Self::AllocationsExceedPayment { .. } => codes::payment::ALLOCATION_EXCEEDS_PAYMENT,
            Self::DuplicateRemittance { .. } => codes::payment::DUPLICATE_REMITTANCE,
            Self::LineAlreadySatisfied { .. }
            | Self::LineAlreadyDenied { .. }
            | Self::NothingToDeny => codes::appeal::DENIAL_INVALID,
            Self::AppealTransition { .. } => codes::appeal::APPEAL_TRANSITION,
            Self::SecondaryNotAllowed { .. }
            | Self::InvalidSecondaryRank { .. }
            | Self::NoFurtherPayerRank
            | Self::BillableDeniedExceedsDenied { .. }
            | Self::NoSecondaryBalance => codes::cob::SECONDARY_NOT_ALLOWED,
            Self::SecondaryAlreadyExists { .. } => codes::cob::SECONDARY_EXISTS,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClaimsError {
    #[error("Validation failed: {0}")]
    Validation(#[from] Violation),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrent modification of claim {claim_id}: expected version {expected}")]
    Conflict { claim_id: Uuid, expected: u64 },

    #[error("{service} failed: {message}")]
    ExternalDependency { service: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ClaimsError {
    pub fn claim_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "claim",
            id: id.to_string(),
        }
    }

    pub fn denial_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "denial",
            id: id.to_string(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Conflicts and dependency failures may succeed when retried from a
    /// fresh read; validation failures never will.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::ExternalDependency { .. } | Self::Storage(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(violation) => violation.code(),
            Self::NotFound { .. } => codes::system::NOT_FOUND,
            Self::Conflict { .. } => codes::system::CONCURRENCY_CONFLICT,
            Self::ExternalDependency { .. } => codes::system::EXTERNAL_DEPENDENCY,
            Self::Storage(_) => codes::system::STORAGE_FAILURE,
            Self::Configuration(_) => codes::system::CONFIGURATION,
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Validation(violation) => Some(violation),
            _ => None,
        }
    }
}

pub type ClaimsResult<T> = Result<T, ClaimsError>;
