use serde::{Deserialize, Serialize};

use crate::models::SubmissionMethod;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Prefix of generated claim numbers
    pub claim_number_prefix: String,
    pub max_diagnosis_codes: usize,
    /// Hours a submitted claim may wait for a payer response before it is
    /// reported as stale
    pub response_timeout_hours: i64,
    /// Times a mutation is replayed after losing an optimistic version race
    pub max_conflict_retries: u32,
    pub default_submission_method: SubmissionMethod,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            claim_number_prefix: "CLM".to_string(),
            max_diagnosis_codes: 12,
            response_timeout_hours: 72,
            max_conflict_retries: 3,
            default_submission_method: SubmissionMethod::Electronic,
        }
    }
}
