//! Append-only workflow history.
//!
//! Every state change, and every mutation that leaves the status untouched,
//! appends one entry. Entries are chained per claim: each carries the hash
//! of its predecessor, starting from the genesis hash `"0"`, so any edit or
//! deletion of a stored entry is detectable with [`verify_chain`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::models::{Actor, ClaimStatus};

pub const GENESIS_HASH: &str = "0";

/// What happened to the claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    Created,
    LineItemAdded,
    DiagnosesUpdated,
    MarkedReady,
    Queued,
    Submitted,
    Accepted,
    Rejected,
    AdjudicationPending,
    PayerResponseRecorded,
    PaymentPosted,
    DenialRecorded,
    AppealFiled,
    AppealReviewStarted,
    AppealResolved,
    Corrected,
    Cancelled,
    Voided,
    Closed,
    SecondaryDerived,
}

impl ClaimAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::LineItemAdded => "line_item_added",
            Self::DiagnosesUpdated => "diagnoses_updated",
            Self::MarkedReady => "marked_ready",
            Self::Queued => "queued",
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::AdjudicationPending => "adjudication_pending",
            Self::PayerResponseRecorded => "payer_response_recorded",
            Self::PaymentPosted => "payment_posted",
            Self::DenialRecorded => "denial_recorded",
            Self::AppealFiled => "appeal_filed",
            Self::AppealReviewStarted => "appeal_review_started",
            Self::AppealResolved => "appeal_resolved",
            Self::Corrected => "corrected",
            Self::Cancelled => "cancelled",
            Self::Voided => "voided",
            Self::Closed => "closed",
            Self::SecondaryDerived => "secondary_derived",
        }
    }
}

impl fmt::Display for ClaimAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistoryEntry {
    pub id: Uuid,
    pub claim_id: Uuid,
    /// 1-based position in the claim's history
    pub sequence: u64,
    /// None only on the creation entry
    pub from_status: Option<ClaimStatus>,
    pub to_status: ClaimStatus,
    pub action: ClaimAction,
    pub actor: Actor,
    pub performed_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Fields for a new entry; sequence and hashes are assigned on append.
#[derive(Debug, Clone)]
pub struct HistoryEvent {
    pub from_status: Option<ClaimStatus>,
    pub to_status: ClaimStatus,
    pub action: ClaimAction,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
}

impl WorkflowHistoryEntry {
    pub fn new(
        claim_id: Uuid,
        sequence: u64,
        event: HistoryEvent,
        actor: Actor,
        performed_at: DateTime<Utc>,
        prev_hash: String,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            claim_id,
            sequence,
            from_status: event.from_status,
            to_status: event.to_status,
            action: event.action,
            actor,
            performed_at,
            notes: event.notes,
            metadata: event.metadata,
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.calculate_hash();
        entry
    }

    /// Hash of every field except `entry_hash` itself.
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.claim_id.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(
            self.from_status
                .map(ClaimStatus::as_str)
                .unwrap_or("")
                .as_bytes(),
        );
        hasher.update(self.to_status.as_str().as_bytes());
        hasher.update(self.action.as_str().as_bytes());
        hasher.update(self.actor.as_str().as_bytes());
        hasher.update(self.performed_at.to_rfc3339().as_bytes());
        hasher.update(self.notes.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.metadata.to_string().as_bytes());
        hasher.update(self.prev_hash.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Result of walking a claim's history chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub entries_checked: usize,
    /// Sequence of the first entry that failed verification
    pub first_invalid_sequence: Option<u64>,
    pub reason: Option<String>,
}

/// Walk the entries in order and check sequence, linkage and hashes.
pub fn verify_chain(entries: &[WorkflowHistoryEntry]) -> ChainVerification {
    let mut expected_prev = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        let failure = if entry.sequence != expected_sequence {
            Some(format!(
                "expected sequence {}, found {}",
                expected_sequence, entry.sequence
            ))
        } else if entry.prev_hash != expected_prev {
            Some("previous hash does not link to prior entry".to_string())
        } else if entry.calculate_hash() != entry.entry_hash {
            Some("entry hash does not match contents".to_string())
        } else {
            None
        };
        if let Some(reason) = failure {
            return ChainVerification {
                valid: false,
                entries_checked: index,
                first_invalid_sequence: Some(entry.sequence),
                reason: Some(reason),
            };
        }
        expected_prev = entry.entry_hash.clone();
    }
    ChainVerification {
        valid: true,
        entries_checked: entries.len(),
        first_invalid_sequence: None,
        reason: None,
    }
}
