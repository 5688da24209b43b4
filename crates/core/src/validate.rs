use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::money::Money;
use super::transaction::ParsedTransaction;

/// A single field-level problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            field,
            message: message.into(),
        });
    }
}

/// Integrity checks applied to parsed transactions before persistence.
///
/// Validation failures never abort an import; invalid rows are reported
/// back to the caller and excluded.
#[derive(Debug, Clone)]
pub struct Validator {
    pub max_past_years: i32,
    pub max_amount: Money,
    pub max_description_len: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            max_past_years: 10,
            max_amount: Money::from_cents(100_000_000),
            max_description_len: 500,
        }
    }
}

impl Validator {
    /// `today` is injected so callers (and tests) control the clock.
    pub fn validate(&self, tx: &ParsedTransaction, today: NaiveDate) -> ValidationResult {
        let mut result = ValidationResult::default();

        if tx.date > today {
            result.push("date", format!("date {} is in the future", tx.date));
        }
        let cutoff_year = today.year() - self.max_past_years;
        let oldest = today.with_year(cutoff_year).unwrap_or_else(|| {
            // Feb 29 with no counterpart in the cutoff year falls back to Feb 28.
            NaiveDate::from_ymd_opt(cutoff_year, today.month(), 28)
                .expect("day 28 exists in every month")
        });
        if tx.date < oldest {
            result.push(
                "date",
                format!(
                    "date {} is more than {} years in the past",
                    tx.date, self.max_past_years
                ),
            );
        }

        if tx.amount.is_zero() {
            result.push("amount", "amount cannot be zero");
        }
        if tx.amount.abs() > self.max_amount {
            result.push(
                "amount",
                format!("amount exceeds maximum of {}", self.max_amount),
            );
        }

        if tx.description.trim().is_empty() {
            result.push("description", "description cannot be empty");
        } else if tx.description.chars().count() > self.max_description_len {
            result.push(
                "description",
                format!(
                    "description exceeds {} characters",
                    self.max_description_len
                ),
            );
        }

        result
    }
}
