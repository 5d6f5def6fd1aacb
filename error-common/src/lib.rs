//! Common error handling utilities for the claims platform
//!
//! This crate holds the pieces of error handling that are shared between the
//! claims engine library and the binaries built on top of it:
//!
//! - **Error Codes**: stable string codes returned to API callers so billing
//!   staff tooling can branch on the failed invariant instead of parsing text
//! - **Error Context**: claim/denial identifiers attached to an error for
//!   correlation in logs and API responses
//! - **Platform Errors**: startup and infrastructure failures of the binaries
//!
//! # Example
//!
//! ```rust
//! use error_common::{codes, ErrorContext};
//!
//! let context = ErrorContext::new()
//!     .with_request_id("req-42".to_string())
//!     .add_context("claim_id", "0b6c1f0e");
//!
//! assert_eq!(codes::lifecycle::ILLEGAL_TRANSITION, "CLAIMS_2001");
//! assert_eq!(context.additional.get("claim_id").map(String::as_str), Some("0b6c1f0e"));
//! ```

pub mod codes;
pub mod context;
pub mod types;

pub use context::*;
pub use types::*;
