use base64::{engine::general_purpose, Engine as _};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::LoggingError;

const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const PHONE_PATTERN: &str = r"(?:\+1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b";
const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
const CARD_PATTERN: &str = r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b";
// Payer member ids: an alphabetic prefix followed by a long digit run (e.g. "XYZ123456789")
const MEMBER_ID_PATTERN: &str = r"\b[A-Z]{2,4}\d{6,12}\b";
const MRN_PATTERN: &str = r"\bMRN[-:#]?\s?\d+\b";

/// A user-supplied pattern and its replacement text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPattern {
    pub pattern: String,
    pub replacement: String,
}

/// PHI redaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_ssn: bool,
    pub redact_card_numbers: bool,
    pub redact_member_ids: bool,
    pub redact_mrn: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<CustomPattern>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            redact_phones: true,
            redact_ssn: true,
            redact_card_numbers: true,
            redact_member_ids: true,
            redact_mrn: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

struct Rule {
    label: &'static str,
    regex: Regex,
    mask: &'static str,
}

/// PHI redactor for free text that is about to be logged
pub struct PiiRedactor {
    rules: Vec<Rule>,
    custom: Vec<(Regex, String)>,
    hash_for_correlation: bool,
}

fn compile(pattern: &str) -> Result<Regex, LoggingError> {
    Regex::new(pattern).map_err(|e| LoggingError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Result<Self, LoggingError> {
        let candidates = [
            // SSN and card numbers run before phones, whose pattern would eat their digits
            (config.redact_ssn, "SSN", SSN_PATTERN, "***-**-****"),
            (config.redact_card_numbers, "CARD", CARD_PATTERN, "****-****-****-****"),
            (config.redact_emails, "EMAIL", EMAIL_PATTERN, "***@***"),
            (config.redact_phones, "PHONE", PHONE_PATTERN, "(***) ***-****"),
            (config.redact_mrn, "MRN", MRN_PATTERN, "MRN[REDACTED]"),
            (config.redact_member_ids, "MEMBER", MEMBER_ID_PATTERN, "MEMBER[REDACTED]"),
        ];

        let mut rules = Vec::new();
        for (enabled, label, pattern, mask) in candidates {
            if enabled {
                rules.push(Rule {
                    label,
                    regex: compile(pattern)?,
                    mask,
                });
            }
        }

        let custom = config
            .custom_patterns
            .iter()
            .map(|p| Ok((compile(&p.pattern)?, p.replacement.clone())))
            .collect::<Result<Vec<_>, LoggingError>>()?;

        Ok(Self {
            rules,
            custom,
            hash_for_correlation: config.hash_for_correlation,
        })
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();

        for rule in &self.rules {
            result = rule
                .regex
                .replace_all(&result, |caps: &Captures| {
                    if self.hash_for_correlation {
                        format!("{}[{}]", rule.label, hash_value(&caps[0]))
                    } else {
                        rule.mask.to_string()
                    }
                })
                .to_string();
        }

        for (pattern, replacement) in &self.custom {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }

        result
    }

    /// Redact an optional value, keeping `None` as an empty string
    pub fn redact_opt(&self, text: Option<&str>) -> String {
        text.map(|t| self.redact(t)).unwrap_or_default()
    }
}

fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    // First 8 bytes keep the tag short while staying collision-resistant enough for log correlation
    general_purpose::STANDARD.encode(&result[..8])
}
