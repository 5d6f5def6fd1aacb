//! Claims Engine for Healthcare Revenue Cycle Management
//!
//! Carries an insurance claim from draft to settlement:
//! - Claim lifecycle state machine with an append-only, hash-chained history
//! - Line item ledger with payment posting and allocation checks
//! - Line and claim level denials with appeal tracking
//! - Coordination of benefits across primary, secondary and tertiary payers
//! - Reconciliation of source and derived claims
//!
//! All mutations go through [`ClaimsService`], which serialises writes per
//! claim and commits each one atomically through a [`ClaimRepository`].

pub mod cob;
pub mod config;
pub mod denial;
pub mod error;
pub mod history;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod monitor;
pub mod payment;
pub mod reporting;
pub mod repository;
pub mod service;
pub mod transaction;
pub mod transport;

pub use cob::*;
pub use config::ClaimsConfig;
pub use denial::*;
pub use error::*;
pub use history::*;
pub use models::*;
pub use monitor::*;
pub use payment::*;
pub use reporting::*;
pub use repository::{ClaimRepository, InMemoryClaimRepository, PostgresClaimRepository};
pub use service::*;
pub use transaction::{ClaimCommit, ClaimTransaction};
pub use transport::*;
