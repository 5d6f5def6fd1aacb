use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::cob::ReconciliationDiscrepancy;
use crate::denial::ClaimDenial;
use crate::error::{ClaimsError, ClaimsResult};
use crate::history::WorkflowHistoryEntry;
use crate::models::{Claim, ClaimFilter};
use crate::payment::PaymentPosting;
use crate::transaction::ClaimCommit;

pub mod postgres;

pub use postgres::PostgresClaimRepository;

/// Durable storage for claims and the records hanging off them.
///
/// Writes only happen through [`ClaimRepository::commit_all`], which applies
/// every commit in the batch or none of them, and refuses any claim whose
/// stored version no longer matches the version the commit was built from.
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Atomically apply a batch of commits
    async fn commit_all(&self, commits: Vec<ClaimCommit>) -> ClaimsResult<()>;

    async fn commit(&self, commit: ClaimCommit) -> ClaimsResult<()> {
        self.commit_all(vec![commit]).await
    }

    async fn get_claim(&self, claim_id: Uuid) -> ClaimsResult<Option<Claim>>;

    async fn list_claims(&self, filter: &ClaimFilter) -> ClaimsResult<Vec<Claim>>;

    /// Claims billed to a later payer from the given claim
    async fn find_derived_claims(&self, source_claim_id: Uuid) -> ClaimsResult<Vec<Claim>>;

    async fn list_postings(&self, claim_id: Uuid) -> ClaimsResult<Vec<PaymentPosting>>;

    async fn get_denial(&self, denial_id: Uuid) -> ClaimsResult<Option<ClaimDenial>>;

    async fn list_denials(&self, claim_id: Uuid) -> ClaimsResult<Vec<ClaimDenial>>;

    /// History entries in sequence order
    async fn history(&self, claim_id: Uuid) -> ClaimsResult<Vec<WorkflowHistoryEntry>>;

    async fn record_discrepancy(&self, discrepancy: &ReconciliationDiscrepancy)
        -> ClaimsResult<()>;

    async fn list_discrepancies(&self) -> ClaimsResult<Vec<ReconciliationDiscrepancy>>;
}

#[derive(Default)]
struct MemoryState {
    claims: HashMap<Uuid, Claim>,
    postings: HashMap<Uuid, Vec<PaymentPosting>>,
    denials: HashMap<Uuid, ClaimDenial>,
    history: HashMap<Uuid, Vec<WorkflowHistoryEntry>>,
    discrepancies: Vec<ReconciliationDiscrepancy>,
}

impl MemoryState {
    fn check(&self, commit: &ClaimCommit) -> ClaimsResult<()> {
        let stored = self.claims.get(&commit.claim.id);
        match (commit.expected_version, stored) {
            (None, None) => Ok(()),
            (Some(expected), Some(stored)) if stored.version == expected => Ok(()),
            (expected, _) => Err(ClaimsError::Conflict {
                claim_id: commit.claim.id,
                expected: expected.unwrap_or(0),
            }),
        }
    }

    fn apply(&mut self, commit: ClaimCommit) {
        let claim_id = commit.claim.id;
        self.postings
            .entry(claim_id)
            .or_default()
            .extend(commit.postings);
        for denial in commit.denials {
            self.denials.insert(denial.id, denial);
        }
        self.history
            .entry(claim_id)
            .or_default()
            .extend(commit.history);
        self.claims.insert(claim_id, commit.claim);
    }
}

/// In-memory claim repository for testing and development
pub struct InMemoryClaimRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryClaimRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    /// Overwrite a stored history entry, bypassing the append-only path.
    /// Only exists so tests can prove tampering is detected.
    #[cfg(test)]
    pub(crate) fn tamper_history(&self, claim_id: Uuid, index: usize, notes: &str) {
        let mut state = self.state.write();
        if let Some(entry) = state
            .history
            .get_mut(&claim_id)
            .and_then(|entries| entries.get_mut(index))
        {
            entry.notes = Some(notes.to_string());
        }
    }
}

impl Default for InMemoryClaimRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClaimRepository for InMemoryClaimRepository {
    async fn commit_all(&self, commits: Vec<ClaimCommit>) -> ClaimsResult<()> {
        let mut state = self.state.write();
        for commit in &commits {
            state.check(commit)?;
        }
        for commit in commits {
            state.apply(commit);
        }
        Ok(())
    }

    async fn get_claim(&self, claim_id: Uuid) -> ClaimsResult<Option<Claim>> {
        Ok(self.state.read().claims.get(&claim_id).cloned())
    }

    async fn list_claims(&self, filter: &ClaimFilter) -> ClaimsResult<Vec<Claim>> {
        let state = self.state.read();
        let mut claims: Vec<Claim> = state
            .claims
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        claims.sort_by_key(|c| c.audit.created_at);
        Ok(claims)
    }

    async fn find_derived_claims(&self, source_claim_id: Uuid) -> ClaimsResult<Vec<Claim>> {
        let state = self.state.read();
        Ok(state
            .claims
            .values()
            .filter(|c| {
                c.cob
                    .as_ref()
                    .is_some_and(|cob| cob.source_claim_id == source_claim_id)
            })
            .cloned()
            .collect())
    }

    async fn list_postings(&self, claim_id: Uuid) -> ClaimsResult<Vec<PaymentPosting>> {
        Ok(self
            .state
            .read()
            .postings
            .get(&claim_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_denial(&self, denial_id: Uuid) -> ClaimsResult<Option<ClaimDenial>> {
        Ok(self.state.read().denials.get(&denial_id).cloned())
    }

    async fn list_denials(&self, claim_id: Uuid) -> ClaimsResult<Vec<ClaimDenial>> {
        let state = self.state.read();
        let mut denials: Vec<ClaimDenial> = state
            .denials
            .values()
            .filter(|d| d.claim_id == claim_id)
            .cloned()
            .collect();
        denials.sort_by_key(|d| d.created_at);
        Ok(denials)
    }

    async fn history(&self, claim_id: Uuid) -> ClaimsResult<Vec<WorkflowHistoryEntry>> {
        Ok(self
            .state
            .read()
            .history
            .get(&claim_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_discrepancy(
        &self,
        discrepancy: &ReconciliationDiscrepancy,
    ) -> ClaimsResult<()> {
        self.state.write().discrepancies.push(discrepancy.clone());
        Ok(())
    }

    async fn list_discrepancies(&self) -> ClaimsResult<Vec<ReconciliationDiscrepancy>> {
        Ok(self.state.read().discrepancies.clone())
    }
}
