//! Line item ledger.
//!
//! Line items are the source of truth for money; claim-level aggregates are
//! derived from them by [`Claim::recompute_financials`] and never stored
//! independently.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Violation;
use crate::models::{Claim, ClaimLineItem, ClaimStatus, LineItemStatus, NewLineItem};

impl ClaimLineItem {
    /// Cap for paid + adjustment + patient responsibility.
    pub fn effective_allowed(&self) -> Decimal {
        self.allowed_amount.unwrap_or(self.line_total)
    }

    pub fn applied(&self) -> Decimal {
        self.paid_amount + self.adjustment_amount + self.patient_responsibility
    }

    /// Balance the payer has not yet resolved.
    pub fn outstanding(&self) -> Decimal {
        (self.effective_allowed() - self.applied()).max(Decimal::ZERO)
    }

    pub fn is_satisfied(&self) -> bool {
        self.applied() >= self.effective_allowed()
    }

    pub fn has_activity(&self) -> bool {
        self.applied() > Decimal::ZERO
    }

    /// Contractual write-off implied by an allowed amount below the charge.
    pub fn write_off(&self) -> Decimal {
        self.allowed_amount
            .map(|allowed| (self.line_total - allowed).max(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO)
    }

    /// Outstanding balance sitting on a denied line.
    pub fn denied_balance(&self) -> Decimal {
        if self.status == LineItemStatus::Denied {
            self.outstanding()
        } else {
            Decimal::ZERO
        }
    }

    /// Settle the line status after amounts change. Denied lines stay denied
    /// until an appeal reopens them.
    pub fn refresh_status(&mut self) {
        if self.status == LineItemStatus::Denied {
            return;
        }
        let adjudicated = self.has_activity() || self.allowed_amount.is_some();
        self.status = if self.is_satisfied() && adjudicated {
            LineItemStatus::Paid
        } else {
            LineItemStatus::Pending
        };
    }

    fn check_invariants(&self) -> Result<(), Violation> {
        let fail = |detail: String| Violation::LedgerInvariant {
            line_number: self.line_number,
            detail,
        };
        for (name, value) in [
            ("paid_amount", self.paid_amount),
            ("adjustment_amount", self.adjustment_amount),
            ("patient_responsibility", self.patient_responsibility),
        ] {
            if value < Decimal::ZERO {
                return Err(fail(format!("{} is negative ({})", name, value)));
            }
        }
        if let Some(allowed) = self.allowed_amount {
            if allowed > self.line_total {
                return Err(fail(format!(
                    "allowed amount {} exceeds line total {}",
                    allowed, self.line_total
                )));
            }
        }
        if self.applied() > self.effective_allowed() {
            return Err(fail(format!(
                "applied amount {} exceeds allowed amount {}",
                self.applied(),
                self.effective_allowed()
            )));
        }
        Ok(())
    }
}

/// Line total is units times unit charge, rounded to cents.
pub fn line_total(units: Decimal, unit_charge: Decimal) -> Decimal {
    (units * unit_charge).round_dp(2)
}

impl Claim {
    pub fn line(&self, line_item_id: Uuid) -> Result<&ClaimLineItem, Violation> {
        self.line_items
            .iter()
            .find(|line| line.id == line_item_id)
            .ok_or(Violation::UnknownLineItem { line_item_id })
    }

    pub fn line_mut(&mut self, line_item_id: Uuid) -> Result<&mut ClaimLineItem, Violation> {
        self.line_items
            .iter_mut()
            .find(|line| line.id == line_item_id)
            .ok_or(Violation::UnknownLineItem { line_item_id })
    }

    /// Append a validated line item. Only draft claims accept new lines.
    pub fn add_line_item(
        &mut self,
        request: &NewLineItem,
        now: DateTime<Utc>,
    ) -> Result<&ClaimLineItem, Violation> {
        if !self.status.is_editable() {
            return Err(Violation::ClaimNotEditable {
                status: self.status,
            });
        }
        let procedure_code = request.procedure_code.trim();
        if procedure_code.is_empty() {
            return Err(Violation::BlankProcedureCode);
        }
        if request.units <= Decimal::ZERO {
            return Err(Violation::NonPositiveUnits);
        }
        if request.unit_charge < Decimal::ZERO {
            return Err(Violation::NegativeAmount {
                field: "unit_charge",
            });
        }
        let line_number = self
            .line_items
            .iter()
            .map(|line| line.line_number)
            .max()
            .unwrap_or(0)
            + 1;
        if request.diagnosis_pointers.is_empty() {
            return Err(Violation::MissingDiagnosisPointer { line_number });
        }
        for &pointer in &request.diagnosis_pointers {
            if pointer == 0 || usize::from(pointer) > self.diagnosis_codes.len() {
                return Err(Violation::UnresolvedDiagnosisPointer {
                    line_number,
                    pointer,
                });
            }
        }
        let service_date = request
            .service_date
            .or(self.service_date_start)
            .unwrap_or_else(|| now.date_naive());

        self.line_items.push(ClaimLineItem {
            id: Uuid::new_v4(),
            line_number,
            service_date,
            place_of_service_code: request
                .place_of_service_code
                .clone()
                .or_else(|| self.place_of_service_code.clone()),
            procedure_code: procedure_code.to_uppercase(),
            modifier: request.modifier.clone(),
            description: request.description.clone(),
            diagnosis_pointers: request.diagnosis_pointers.clone(),
            units: request.units,
            unit_charge: request.unit_charge,
            line_total: line_total(request.units, request.unit_charge),
            allowed_amount: None,
            paid_amount: Decimal::ZERO,
            adjustment_amount: Decimal::ZERO,
            patient_responsibility: Decimal::ZERO,
            status: LineItemStatus::Pending,
            denial_id: None,
            created_at: now,
            updated_at: now,
        });
        self.recompute_financials();
        self.line_items
            .last()
            .ok_or(Violation::NoLineItems)
    }

    pub fn recompute_financials(&mut self) {
        let mut summary = crate::models::FinancialSummary::default();
        for line in &self.line_items {
            summary.total_charges += line.line_total;
            summary.amount_paid += line.paid_amount;
            summary.adjustments += line.adjustment_amount;
            summary.patient_responsibility += line.patient_responsibility;
            summary.write_off += line.write_off();
            summary.outstanding += line.outstanding();
        }
        self.financials = summary;
    }

    pub fn has_applied_money(&self) -> bool {
        self.line_items.iter().any(ClaimLineItem::has_activity)
    }

    /// Outstanding balance on denied lines.
    pub fn denied_balance(&self) -> Decimal {
        self.line_items.iter().map(ClaimLineItem::denied_balance).sum()
    }

    /// Outstanding balance on lines that are not denied.
    pub fn open_balance(&self) -> Decimal {
        self.line_items
            .iter()
            .filter(|line| line.status != LineItemStatus::Denied)
            .map(ClaimLineItem::outstanding)
            .sum()
    }

    /// Adjudicated status implied by the ledger, or `None` when the ledger
    /// alone does not settle the claim.
    ///
    /// The claim is only denied once nothing was paid and every line still
    /// open is denied. A denial on some lines leaves the rest payable.
    pub fn adjudication_rollup(&self, denial_in_effect: bool) -> Option<ClaimStatus> {
        if self.line_items.is_empty() {
            return None;
        }
        if self.line_items.iter().all(ClaimLineItem::is_satisfied) {
            return Some(ClaimStatus::Paid);
        }
        if self.has_applied_money() {
            return Some(ClaimStatus::PartialPaid);
        }
        let fully_denied = self
            .line_items
            .iter()
            .all(|line| line.status == LineItemStatus::Denied || line.is_satisfied())
            && self
                .line_items
                .iter()
                .any(|line| line.status == LineItemStatus::Denied);
        if denial_in_effect && fully_denied {
            return Some(ClaimStatus::Denied);
        }
        None
    }

    /// Every line must satisfy the allocation invariants before commit.
    pub fn verify_ledger(&self) -> Result<(), Violation> {
        self.line_items
            .iter()
            .try_for_each(ClaimLineItem::check_invariants)
    }
}
