//! PHI-aware logging for the claims platform
//!
//! Claims carry member identifiers, patient references and free text written
//! by payers (denial reasons, response messages, appeal notes). Stored records
//! keep that text verbatim; this crate makes sure the copy that reaches the
//! log stream does not.
//!
//! - [`PiiRedactor`] masks or hashes emails, phone numbers, SSNs, card numbers,
//!   member identifiers and medical record numbers in free text. Hashing keeps
//!   redacted values correlatable across log lines.
//! - [`init_logging`] installs the process-wide `tracing` subscriber: JSON in
//!   production, human-readable in development, optional rolling file output.
//!
//! # Example
//!
//! ```rust
//! use logger_redacted::{PiiRedactor, RedactionConfig};
//!
//! let redactor = PiiRedactor::new(RedactionConfig {
//!     hash_for_correlation: false,
//!     ..Default::default()
//! })?;
//!
//! let line = redactor.redact("Denied: member ABC123456789 SSN 123-45-6789");
//! assert!(!line.contains("123-45-6789"));
//! # Ok::<(), logger_redacted::LoggingError>(())
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: json
//!   file:
//!     directory: /var/log/claims
//!     prefix: claims-server.log
//!   redaction:
//!     redact_member_ids: true
//!     hash_for_correlation: true
//!     custom_patterns:
//!       - pattern: "\\bACCT-\\d+"
//!         replacement: "ACCT-[REDACTED]"
//! ```

pub mod config;
pub mod redactor;
pub mod subscriber;

pub use config::*;
pub use redactor::*;
pub use subscriber::*;

use thiserror::Error;

/// Logging setup failures
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid redaction pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),

    #[error("Logging already initialised: {0}")]
    AlreadyInitialised(String),
}
