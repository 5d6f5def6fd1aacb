use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::cob::CoordinationOfBenefits;
use crate::denial::DenialCategory;
use crate::payment::PaymentMethod;

/// Identity that performed an operation. Authorization happens upstream;
/// the engine only records who acted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(String);

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Actor used for engine-initiated work such as void reversals.
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claim status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Draft,
    ReadyToSubmit,
    Queued,
    Submitted,
    Accepted,
    Rejected,
    Pending,
    Paid,
    PartialPaid,
    Denied,
    Appealed,
    Closed,
    Cancelled,
    Voided,
}

impl ClaimStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::ReadyToSubmit => "ready_to_submit",
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PartialPaid => "partial_paid",
            Self::Denied => "denied",
            Self::Appealed => "appealed",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Voided => "voided",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    #[default]
    Professional, // CMS-1500 / 837P
    Institutional, // UB-04 / 837I
    Dme,
}

/// How a claim reaches the payer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMethod {
    #[default]
    Electronic,
    Paper,
    DirectEntry,
}

/// Position of the payer in the coordination-of-benefits order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayerRank {
    #[default]
    Primary,
    Secondary,
    Tertiary,
}

impl PayerRank {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Primary => Some(Self::Secondary),
            Self::Secondary => Some(Self::Tertiary),
            Self::Tertiary => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
        }
    }
}

impl fmt::Display for PayerRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payer and coverage the claim is billed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerContext {
    #[serde(default)]
    pub rank: PayerRank,
    pub payer_id: String,
    pub payer_name: Option<String>,
    pub member_id: String,
    pub group_number: Option<String>,
    pub plan_name: Option<String>,
    /// X12 subscriber relationship code, "18" is self
    #[serde(default = "default_relationship")]
    pub relationship_code: String,
}

fn default_relationship() -> String {
    "18".to_string()
}

/// Line item adjudication status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    #[default]
    Pending,
    Paid,
    Denied,
}

/// One billable service on a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimLineItem {
    pub id: Uuid,
    pub line_number: u32,
    pub service_date: NaiveDate,
    pub place_of_service_code: Option<String>,
    pub procedure_code: String,
    pub modifier: Option<String>,
    pub description: Option<String>,
    /// 1-based indices into the claim's diagnosis list
    pub diagnosis_pointers: Vec<u8>,
    pub units: Decimal,
    pub unit_charge: Decimal,
    pub line_total: Decimal,
    /// None until the payer adjudicates the line
    pub allowed_amount: Option<Decimal>,
    pub paid_amount: Decimal,
    pub adjustment_amount: Decimal,
    pub patient_responsibility: Decimal,
    pub status: LineItemStatus,
    pub denial_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to add a line item to a draft claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLineItem {
    pub procedure_code: String,
    pub modifier: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub diagnosis_pointers: Vec<u8>,
    pub units: Decimal,
    pub unit_charge: Decimal,
    pub service_date: Option<NaiveDate>,
    pub place_of_service_code: Option<String>,
}

/// Aggregate amounts, always recomputed from the line items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub total_charges: Decimal,
    pub amount_paid: Decimal,
    pub adjustments: Decimal,
    pub patient_responsibility: Decimal,
    pub write_off: Decimal,
    pub outstanding: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionInfo {
    pub method: SubmissionMethod,
    pub submitted_at: DateTime<Utc>,
    pub submitted_by: Actor,
    pub payer_control_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerResponseInfo {
    pub code: String,
    pub message: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub received_on: NaiveDate,
    pub method: PaymentMethod,
    pub check_number: Option<String>,
    pub reference_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenialInfo {
    pub code: String,
    pub reason: String,
    pub category: DenialCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
    pub updated_by: Actor,
    pub updated_at: DateTime<Utc>,
}

/// Insurance claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    /// Assigned once, when the claim is first queued for submission
    pub claim_number: Option<String>,
    /// Optimistic concurrency token, bumped on every committed mutation
    pub version: u64,
    pub patient_ref: String,
    pub visit_ref: Option<String>,
    pub rendering_provider_ref: Option<String>,
    pub billing_provider_ref: Option<String>,
    pub facility_ref: Option<String>,
    pub payer: PayerContext,
    pub claim_type: ClaimType,
    pub place_of_service_code: Option<String>,
    pub service_date_start: Option<NaiveDate>,
    pub service_date_end: Option<NaiveDate>,
    pub diagnosis_codes: Vec<String>,
    pub principal_diagnosis: Option<String>,
    pub line_items: Vec<ClaimLineItem>,
    pub financials: FinancialSummary,
    pub status: ClaimStatus,
    pub submission_attempts: u32,
    pub submission: Option<SubmissionInfo>,
    pub payer_response: Option<PayerResponseInfo>,
    pub payment: Option<PaymentInfo>,
    pub denial: Option<DenialInfo>,
    pub cob: Option<CoordinationOfBenefits>,
    /// Fingerprints of payer responses already applied
    pub ingested_responses: Vec<String>,
    pub history_sequence: u64,
    pub history_head: String,
    pub notes: Option<String>,
    pub audit: AuditStamp,
}

/// Request to open a new draft claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClaim {
    pub patient_ref: String,
    pub visit_ref: Option<String>,
    pub rendering_provider_ref: Option<String>,
    pub billing_provider_ref: Option<String>,
    pub facility_ref: Option<String>,
    pub payer: PayerContext,
    #[serde(default)]
    pub diagnoses: Vec<String>,
    pub principal_diagnosis: Option<String>,
    #[serde(default)]
    pub claim_type: ClaimType,
    pub place_of_service_code: Option<String>,
    pub service_date_start: Option<NaiveDate>,
    pub service_date_end: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Replacement diagnosis list for a draft claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisUpdate {
    pub codes: Vec<String>,
    pub principal: Option<String>,
}

/// Filter for claim listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimFilter {
    pub status: Option<ClaimStatus>,
    pub patient_ref: Option<String>,
    pub payer_id: Option<String>,
    pub rank: Option<PayerRank>,
}

impl ClaimFilter {
    pub fn matches(&self, claim: &Claim) -> bool {
        self.status.map_or(true, |s| claim.status == s)
            && self
                .patient_ref
                .as_deref()
                .map_or(true, |p| claim.patient_ref == p)
            && self
                .payer_id
                .as_deref()
                .map_or(true, |p| claim.payer.payer_id == p)
            && self.rank.map_or(true, |r| claim.payer.rank == r)
    }
}

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).to_uppercase()
}

/// Claim numbers look like `CLM-LX4G2K1A-7QZ3`: prefix, base-36 epoch
/// milliseconds, four random base-36 characters.
pub fn generate_claim_number(prefix: &str, now: DateTime<Utc>) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]).to_ascii_uppercase())
        .collect();
    format!("{}-{}-{}", prefix, to_base36(millis), suffix)
}

/// Trim and upper-case a diagnosis code the way payers expect it.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}
