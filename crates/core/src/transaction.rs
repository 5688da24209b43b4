use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub i64);

/// The original cells of one statement row, keyed by header label.
/// Kept as provenance alongside the parsed values.
pub type RawRow = BTreeMap<String, String>;

/// One row of a bank statement after parsing, before persistence.
///
/// The parser never sets `account_id`; the import workflow attaches it
/// before validation and duplicate checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub balance: Option<Money>,
    pub raw_data: RawRow,
    pub account_id: Option<AccountId>,
}

impl ParsedTransaction {
    pub fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }
}

/// A persisted transaction as read back from storage. Read-only from the
/// detectors' perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub description: String,
    pub amount: Money,
    pub category_id: Option<CategoryId>,
}
