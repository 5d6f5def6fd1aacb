// Error codes for the claims platform
// Codes are part of the public API contract; never renumber an existing code.

/// Input and invariant validation failures (caller must fix the input)
pub mod validation {
    pub const INVALID_INPUT: &str = "CLAIMS_1001";
    pub const MISSING_REQUIRED_FIELD: &str = "CLAIMS_1002";
    pub const DIAGNOSIS_INVALID: &str = "CLAIMS_1003";
    pub const LINE_ITEM_INVALID: &str = "CLAIMS_1004";
}

/// Claim lifecycle state machine violations
pub mod lifecycle {
    pub const ILLEGAL_TRANSITION: &str = "CLAIMS_2001";
    pub const PRECONDITION_FAILED: &str = "CLAIMS_2002";
    pub const CLAIM_TERMINAL: &str = "CLAIMS_2003";
}

/// Payment posting and allocation failures
pub mod payment {
    pub const ALLOCATION_EXCEEDS_ALLOWED: &str = "CLAIMS_3001";
    pub const ALLOCATION_EXCEEDS_PAYMENT: &str = "CLAIMS_3002";
    pub const DUPLICATE_REMITTANCE: &str = "CLAIMS_3003";
    pub const INVALID_AMOUNT: &str = "CLAIMS_3004";
}

/// Denial and appeal workflow failures
pub mod appeal {
    pub const DENIAL_INVALID: &str = "CLAIMS_4001";
    pub const APPEAL_TRANSITION: &str = "CLAIMS_4002";
}

/// Coordination of benefits failures
pub mod cob {
    pub const SECONDARY_NOT_ALLOWED: &str = "CLAIMS_5001";
    pub const SECONDARY_EXISTS: &str = "CLAIMS_5002";
}

/// Lookup, concurrency and infrastructure failures
pub mod system {
    pub const NOT_FOUND: &str = "CLAIMS_9001";
    pub const CONCURRENCY_CONFLICT: &str = "CLAIMS_9002";
    pub const EXTERNAL_DEPENDENCY: &str = "CLAIMS_9003";
    pub const STORAGE_FAILURE: &str = "CLAIMS_9004";
    pub const CONFIGURATION: &str = "CLAIMS_9005";
}
