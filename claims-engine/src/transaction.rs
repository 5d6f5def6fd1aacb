//! Unit of work for one claim mutation.
//!
//! A [`ClaimTransaction`] holds a working copy of the claim and its denials.
//! Operations mutate the copy and append history; nothing is visible until
//! [`ClaimTransaction::into_commit`] is handed to the repository, which
//! writes the claim, ledger records and history in one atomic step guarded
//! by the claim version.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::denial::ClaimDenial;
use crate::error::Violation;
use crate::history::{ClaimAction, HistoryEvent, WorkflowHistoryEntry};
use crate::lifecycle::ensure_transition;
use crate::models::{Actor, Claim, ClaimStatus, DenialInfo};
use crate::payment::PaymentPosting;

/// Everything one mutation writes, applied atomically by the repository.
#[derive(Debug, Clone)]
pub struct ClaimCommit {
    pub claim: Claim,
    /// None inserts a new claim; Some must match the stored version
    pub expected_version: Option<u64>,
    pub postings: Vec<PaymentPosting>,
    pub denials: Vec<ClaimDenial>,
    pub history: Vec<WorkflowHistoryEntry>,
}

pub struct ClaimTransaction {
    claim: Claim,
    expected_version: Option<u64>,
    denials: Vec<ClaimDenial>,
    touched_denials: BTreeSet<Uuid>,
    postings: Vec<PaymentPosting>,
    history: Vec<WorkflowHistoryEntry>,
    actor: Actor,
    now: DateTime<Utc>,
}

impl ClaimTransaction {
    /// Start a mutation of a stored claim.
    pub fn begin(claim: Claim, denials: Vec<ClaimDenial>, actor: Actor) -> Self {
        let expected_version = Some(claim.version);
        Self {
            claim,
            expected_version,
            denials,
            touched_denials: BTreeSet::new(),
            postings: Vec::new(),
            history: Vec::new(),
            actor,
            now: Utc::now(),
        }
    }

    /// Start the insert of a new claim, writing its creation entry.
    pub fn create(claim: Claim, actor: Actor, notes: Option<String>) -> Self {
        let mut tx = Self {
            expected_version: None,
            denials: Vec::new(),
            touched_denials: BTreeSet::new(),
            postings: Vec::new(),
            history: Vec::new(),
            now: claim.audit.created_at,
            claim,
            actor,
        };
        let status = tx.claim.status;
        tx.append(None, status, ClaimAction::Created, notes, Value::Null);
        tx
    }

    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    pub fn claim_mut(&mut self) -> &mut Claim {
        &mut self.claim
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn status(&self) -> ClaimStatus {
        self.claim.status
    }

    pub fn denials(&self) -> &[ClaimDenial] {
        &self.denials
    }

    pub fn denial(&self, id: Uuid) -> Option<&ClaimDenial> {
        self.denials.iter().find(|d| d.id == id)
    }

    pub fn denial_mut(&mut self, id: Uuid) -> Option<&mut ClaimDenial> {
        let denial = self.denials.iter_mut().find(|d| d.id == id)?;
        self.touched_denials.insert(id);
        Some(denial)
    }

    pub fn add_denial(&mut self, denial: ClaimDenial) {
        self.touched_denials.insert(denial.id);
        self.denials.push(denial);
    }

    pub fn add_posting(&mut self, posting: PaymentPosting) {
        self.postings.push(posting);
    }

    /// True when the operation decided there was nothing to write.
    pub fn is_noop(&self) -> bool {
        self.history.is_empty() && self.postings.is_empty() && self.touched_denials.is_empty()
    }

    pub fn has_denial_in_effect(&self) -> bool {
        self.denials.iter().any(ClaimDenial::is_in_effect)
    }

    pub fn has_open_appeal(&self) -> bool {
        self.denials.iter().any(|d| d.appeal_status.is_open())
    }

    /// Move the claim along a legal edge and record it.
    pub fn transition(
        &mut self,
        to: ClaimStatus,
        action: ClaimAction,
        notes: Option<String>,
        metadata: Value,
    ) -> Result<(), Violation> {
        let from = self.claim.status;
        ensure_transition(from, to)?;
        self.claim.status = to;
        self.append(Some(from), to, action, notes, metadata);
        Ok(())
    }

    /// Record a mutation that leaves the status unchanged.
    pub fn record(&mut self, action: ClaimAction, notes: Option<String>, metadata: Value) {
        let status = self.claim.status;
        self.append(Some(status), status, action, notes, metadata);
    }

    /// Settle the status from the ledger after money or denials change.
    /// `fallback` applies when the ledger alone does not decide.
    pub fn settle(
        &mut self,
        action: ClaimAction,
        fallback: ClaimStatus,
        metadata: Value,
    ) -> Result<ClaimStatus, Violation> {
        let target = self
            .claim
            .adjudication_rollup(self.has_denial_in_effect())
            .unwrap_or(fallback);
        if target == ClaimStatus::Denied {
            self.claim.denial = self
                .denials
                .iter()
                .filter(|d| d.is_in_effect())
                .max_by_key(|d| d.created_at)
                .map(|d| DenialInfo {
                    code: d.denial_code.clone(),
                    reason: d.denial_reason.clone(),
                    category: d.denial_category,
                });
        } else if !self.has_denial_in_effect() {
            self.claim.denial = None;
        }
        if target == self.claim.status {
            self.record(action, None, metadata);
        } else {
            self.transition(target, action, None, metadata)?;
        }
        Ok(target)
    }

    fn append(
        &mut self,
        from: Option<ClaimStatus>,
        to: ClaimStatus,
        action: ClaimAction,
        notes: Option<String>,
        metadata: Value,
    ) {
        let sequence = self.claim.history_sequence + 1;
        let entry = WorkflowHistoryEntry::new(
            self.claim.id,
            sequence,
            HistoryEvent {
                from_status: from,
                to_status: to,
                action,
                notes,
                metadata,
            },
            self.actor.clone(),
            self.now,
            self.claim.history_head.clone(),
        );
        self.claim.history_sequence = sequence;
        self.claim.history_head = entry.entry_hash.clone();
        self.history.push(entry);
    }

    /// Finish the mutation. Fails if the ledger invariants do not hold, in
    /// which case nothing is written.
    pub fn into_commit(mut self) -> Result<ClaimCommit, Violation> {
        self.claim.recompute_financials();
        self.claim.verify_ledger()?;
        self.claim.version = self.expected_version.map_or(1, |v| v + 1);
        self.claim.audit.updated_by = self.actor.clone();
        self.claim.audit.updated_at = self.now;

        let touched = self.touched_denials;
        let denials = self
            .denials
            .into_iter()
            .filter(|d| touched.contains(&d.id))
            .collect();
        Ok(ClaimCommit {
            claim: self.claim,
            expected_version: self.expected_version,
            postings: self.postings,
            denials,
            history: self.history,
        })
    }
}
