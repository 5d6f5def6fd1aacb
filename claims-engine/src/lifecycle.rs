//! Claim lifecycle state machine.
//!
//! Every status change goes through [`ensure_transition`]; the edge table in
//! [`ClaimStatus::allowed_transitions`] is the only source of legal moves.

use std::collections::HashSet;

use crate::error::Violation;
use crate::models::{normalize_code, Claim, ClaimStatus};

const CANCELLABLE: [ClaimStatus; 7] = [
    ClaimStatus::Draft,
    ClaimStatus::ReadyToSubmit,
    ClaimStatus::Queued,
    ClaimStatus::Submitted,
    ClaimStatus::Accepted,
    ClaimStatus::Rejected,
    ClaimStatus::Pending,
];

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 14] = [
        ClaimStatus::Draft,
        ClaimStatus::ReadyToSubmit,
        ClaimStatus::Queued,
        ClaimStatus::Submitted,
        ClaimStatus::Accepted,
        ClaimStatus::Rejected,
        ClaimStatus::Pending,
        ClaimStatus::Paid,
        ClaimStatus::PartialPaid,
        ClaimStatus::Denied,
        ClaimStatus::Appealed,
        ClaimStatus::Closed,
        ClaimStatus::Cancelled,
        ClaimStatus::Voided,
    ];

    /// Forward edges, excluding the cancel and void exits which are
    /// handled by [`ClaimStatus::can_transition_to`].
    pub fn allowed_transitions(self) -> &'static [ClaimStatus] {
        use ClaimStatus::*;
        match self {
            Draft => &[ReadyToSubmit],
            ReadyToSubmit => &[Queued],
            Queued => &[Submitted],
            Submitted => &[Accepted, Rejected],
            Accepted => &[Pending],
            Rejected => &[Draft],
            Pending => &[Paid, PartialPaid, Denied],
            PartialPaid => &[Paid, Appealed, Closed],
            Paid => &[Closed],
            Denied => &[Appealed, Closed],
            Appealed => &[Pending, Paid, PartialPaid, Denied, Closed],
            Closed | Cancelled | Voided => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled | Self::Voided)
    }

    /// Only pre-payment states may be cancelled.
    pub fn is_cancellable(self) -> bool {
        CANCELLABLE.contains(&self)
    }

    /// Editable states accept line item and diagnosis changes.
    pub fn is_editable(self) -> bool {
        self == Self::Draft
    }

    /// States the payer has finished adjudicating.
    pub fn is_adjudicated(self) -> bool {
        matches!(self, Self::Paid | Self::PartialPaid | Self::Denied)
    }

    /// States in which payments can be posted.
    pub fn accepts_payments(self) -> bool {
        matches!(self, Self::Pending | Self::PartialPaid | Self::Appealed)
    }

    /// Payer responses are only meaningful once the claim has left the office.
    pub fn is_submitted(self) -> bool {
        !matches!(
            self,
            Self::Draft | Self::ReadyToSubmit | Self::Queued | Self::Cancelled | Self::Voided
        )
    }

    pub fn can_transition_to(self, to: ClaimStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            ClaimStatus::Voided => true,
            ClaimStatus::Cancelled => self.is_cancellable(),
            _ => self.allowed_transitions().contains(&to),
        }
    }
}

pub fn ensure_transition(from: ClaimStatus, to: ClaimStatus) -> Result<(), Violation> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Violation::IllegalTransition { from, to })
    }
}

/// Diagnosis list rules shared by claim creation and diagnosis updates.
/// Returns the normalized codes and the principal diagnosis.
pub fn validate_diagnoses(
    codes: &[String],
    principal: Option<&str>,
    max: usize,
) -> Result<(Vec<String>, Option<String>), Violation> {
    if codes.len() > max {
        return Err(Violation::TooManyDiagnoses {
            count: codes.len(),
            max,
        });
    }
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(codes.len());
    for code in codes {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(Violation::BlankDiagnosisCode);
        }
        if !seen.insert(code.clone()) {
            return Err(Violation::DuplicateDiagnosis { code });
        }
        normalized.push(code);
    }
    let principal = match principal.map(normalize_code) {
        Some(code) if !seen.contains(&code) => {
            return Err(Violation::PrincipalDiagnosisNotListed { code })
        }
        Some(code) => Some(code),
        None => normalized.first().cloned(),
    };
    Ok((normalized, principal))
}

/// Checks a claim must pass before it can be marked ready to submit.
pub fn check_submittable(claim: &Claim, max_diagnoses: usize) -> Result<(), Violation> {
    if claim.line_items.is_empty() {
        return Err(Violation::NoLineItems);
    }
    if claim.diagnosis_codes.is_empty() {
        return Err(Violation::NoDiagnoses);
    }
    if claim.diagnosis_codes.len() > max_diagnoses {
        return Err(Violation::TooManyDiagnoses {
            count: claim.diagnosis_codes.len(),
            max: max_diagnoses,
        });
    }
    for line in &claim.line_items {
        if line.diagnosis_pointers.is_empty() {
            return Err(Violation::MissingDiagnosisPointer {
                line_number: line.line_number,
            });
        }
        for &pointer in &line.diagnosis_pointers {
            if pointer == 0 || usize::from(pointer) > claim.diagnosis_codes.len() {
                return Err(Violation::UnresolvedDiagnosisPointer {
                    line_number: line.line_number,
                    pointer,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_edges_are_legal() {
        let path = [
            ClaimStatus::Draft,
            ClaimStatus::ReadyToSubmit,
            ClaimStatus::Queued,
            ClaimStatus::Submitted,
            ClaimStatus::Accepted,
            ClaimStatus::Pending,
            ClaimStatus::Paid,
            ClaimStatus::Closed,
        ];
        for pair in path.windows(2) {
            assert!(ensure_transition(pair[0], pair[1]).is_ok(), "{:?}", pair);
        }
    }

    #[test]
    fn draft_cannot_jump_to_paid() {
        assert_eq!(
            ensure_transition(ClaimStatus::Draft, ClaimStatus::Paid),
            Err(Violation::IllegalTransition {
                from: ClaimStatus::Draft,
                to: ClaimStatus::Paid
            })
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [ClaimStatus::Closed, ClaimStatus::Cancelled, ClaimStatus::Voided] {
            for to in ClaimStatus::ALL {
                assert!(!terminal.can_transition_to(to), "{} -> {}", terminal, to);
            }
        }
    }

    #[test]
    fn cancel_only_before_payment() {
        assert!(ClaimStatus::Pending.can_transition_to(ClaimStatus::Cancelled));
        assert!(!ClaimStatus::PartialPaid.can_transition_to(ClaimStatus::Cancelled));
        assert!(!ClaimStatus::Paid.can_transition_to(ClaimStatus::Cancelled));
        assert!(ClaimStatus::Paid.can_transition_to(ClaimStatus::Voided));
    }

    #[test]
    fn rejected_returns_to_draft() {
        assert!(ClaimStatus::Rejected.can_transition_to(ClaimStatus::Draft));
        assert!(!ClaimStatus::Rejected.can_transition_to(ClaimStatus::Submitted));
    }

    #[test]
    fn diagnoses_are_normalized_and_unique() {
        let codes = vec![" e11.9 ".to_string(), "I10".to_string()];
        let (normalized, principal) = validate_diagnoses(&codes, None, 12).unwrap();
        assert_eq!(normalized, vec!["E11.9", "I10"]);
        assert_eq!(principal.as_deref(), Some("E11.9"));

        let dup = vec!["I10".to_string(), "i10".to_string()];
        assert!(matches!(
            validate_diagnoses(&dup, None, 12),
            Err(Violation::DuplicateDiagnosis { .. })
        ));
    }

    #[test]
    fn too_many_diagnoses_rejected() {
        let codes: Vec<String> = (0..13).map(|i| format!("Z{:02}", i)).collect();
        assert_eq!(
            validate_diagnoses(&codes, None, 12),
            Err(Violation::TooManyDiagnoses { count: 13, max: 12 })
        );
    }

    #[test]
    fn principal_must_be_listed() {
        let codes = vec!["I10".to_string()];
        assert!(matches!(
            validate_diagnoses(&codes, Some("E11.9"), 12),
            Err(Violation::PrincipalDiagnosisNotListed { .. })
        ));
    }
}
