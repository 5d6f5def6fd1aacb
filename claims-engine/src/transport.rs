//! Payer-facing boundary: transmitting claims and interpreting responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::denial::DenialRequest;
use crate::error::ClaimsError;
use crate::models::{Claim, SubmissionMethod};
use crate::payment::PaymentRequest;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("payer did not answer within {0} seconds")]
    Timeout(u64),

    #[error("payer endpoint unavailable: {0}")]
    Unavailable(String),

    #[error("transmission refused: {0}")]
    Refused(String),
}

impl From<TransportError> for ClaimsError {
    fn from(err: TransportError) -> Self {
        ClaimsError::ExternalDependency {
            service: "claim transport".to_string(),
            message: err.to_string(),
        }
    }
}

/// Proof that a claim left for the payer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub payer_control_number: Option<String>,
    pub transmitted_at: DateTime<Utc>,
}

/// Delivers a claim to the payer, electronically or otherwise.
#[async_trait]
pub trait ClaimTransport: Send + Sync {
    async fn transmit(
        &self,
        claim: &Claim,
        method: SubmissionMethod,
    ) -> Result<SubmissionReceipt, TransportError>;
}

/// Transport for claims delivered outside the engine: printed, keyed into
/// a payer portal, or handed to a clearinghouse by another system. The
/// claim is recorded as sent without a payer control number.
#[derive(Debug, Default, Clone)]
pub struct ManualTransport;

#[async_trait]
impl ClaimTransport for ManualTransport {
    async fn transmit(
        &self,
        _claim: &Claim,
        _method: SubmissionMethod,
    ) -> Result<SubmissionReceipt, TransportError> {
        Ok(SubmissionReceipt {
            payer_control_number: None,
            transmitted_at: Utc::now(),
        })
    }
}

/// Payment and denial detail carried by an adjudication response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Remittance {
    pub payment: Option<PaymentRequest>,
    #[serde(default)]
    pub denials: Vec<DenialRequest>,
}

/// Acknowledgement, status or adjudication response from a payer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayerResponse {
    pub response_code: String,
    pub response_message: Option<String>,
    pub received_at: DateTime<Utc>,
    pub remittance: Option<Remittance>,
}

impl PayerResponse {
    /// Stable identity of the response, so redelivered responses are
    /// recognised and ignored.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.response_code.trim().as_bytes());
        hasher.update(self.response_message.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.received_at.to_rfc3339().as_bytes());
        if let Some(remittance) = &self.remittance {
            hasher.update(serde_json::to_vec(remittance).unwrap_or_default());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// What a payer response code means for the claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Claim accepted for adjudication (277 A1, A2)
    Accepted,
    /// Claim in adjudication (277 A3, A4)
    Pending,
    /// Claim rejected before adjudication (277 R1 to R4)
    Rejected,
    /// Claim adjudicated with payment (835 status 1, 2, 3)
    Processed,
    /// Claim adjudicated as denied (835 status 4)
    Denied,
}

impl ResponseKind {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "A1" | "A2" => Some(Self::Accepted),
            "A3" | "A4" => Some(Self::Pending),
            "R1" | "R2" | "R3" | "R4" => Some(Self::Rejected),
            "1" | "2" | "3" => Some(Self::Processed),
            "4" => Some(Self::Denied),
            _ => None,
        }
    }
}
