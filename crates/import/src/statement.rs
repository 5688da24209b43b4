use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use pecunia_core::{Money, ParsedTransaction, RawRow};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

#[derive(Error, Debug)]
pub enum StatementError {
    #[error("could not read statement file: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("statement file is empty")]
    EmptyFile,
    #[error("could not read CSV with any common delimiter")]
    NoDelimiter,
    #[error("could not find {0} column; expected one of: {1}")]
    MissingColumn(&'static str, String),
    #[error("could not find amount columns; expected an 'amount' column or 'debit'/'credit' columns")]
    MissingAmountColumns,
    #[error("no valid transactions found in statement")]
    NoValidTransactions,
}

/// Why a single row was skipped. Never escapes the parse loop.
#[derive(Error, Debug)]
enum RowError {
    #[error("invalid date '{0}'")]
    InvalidDate(String),
    #[error("invalid amount '{0}'")]
    InvalidAmount(String),
}

/// The logical fields a statement column can map to, probed in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Date,
    Description,
    Amount,
    Debit,
    Credit,
    Balance,
}

impl ColumnKind {
    /// Candidate header names in priority order; first match wins.
    /// "description" deliberately outranks "details".
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            ColumnKind::Date => &[
                "date",
                "transaction date",
                "posting date",
                "trans date",
                "transaction_date",
                "post date",
                "value date",
            ],
            ColumnKind::Description => &[
                "description",
                "merchant",
                "payee",
                "memo",
                "narrative",
                "particulars",
                "reference",
                "details",
            ],
            ColumnKind::Amount => &["amount", "transaction amount", "value"],
            ColumnKind::Debit => &[
                "debit",
                "withdrawal",
                "withdrawals",
                "debit amount",
                "paid out",
                "spend",
            ],
            ColumnKind::Credit => &[
                "credit",
                "deposit",
                "deposits",
                "credit amount",
                "paid in",
                "received",
            ],
            ColumnKind::Balance => &[
                "balance",
                "running balance",
                "available balance",
                "closing balance",
                "current balance",
            ],
        }
    }
}

/// Resolved header positions for one statement file.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub date: usize,
    pub description: usize,
    pub amount: Option<usize>,
    pub debit: Option<usize>,
    pub credit: Option<usize>,
    pub balance: Option<usize>,
}

impl ColumnMap {
    pub fn detect(headers: &csv::StringRecord) -> Result<Self, StatementError> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let find = |kind: ColumnKind| -> Option<usize> {
            kind.candidates()
                .iter()
                .find_map(|candidate| normalized.iter().position(|h| h == candidate))
        };

        let date = find(ColumnKind::Date).ok_or_else(|| {
            StatementError::MissingColumn("date", ColumnKind::Date.candidates().join(", "))
        })?;
        let description = find(ColumnKind::Description).ok_or_else(|| {
            StatementError::MissingColumn(
                "description",
                ColumnKind::Description.candidates().join(", "),
            )
        })?;

        let amount = find(ColumnKind::Amount);
        let debit = find(ColumnKind::Debit);
        let credit = find(ColumnKind::Credit);
        if amount.is_none() && debit.is_none() && credit.is_none() {
            return Err(StatementError::MissingAmountColumns);
        }

        Ok(ColumnMap {
            date,
            description,
            amount,
            debit,
            credit,
            balance: find(ColumnKind::Balance),
        })
    }
}

/// Flexible parser for bank and credit-card statement exports.
///
/// Auto-detects the delimiter and the column layout, then parses rows
/// continue-on-error: a malformed row is logged and skipped, only a file
/// yielding nothing at all is a hard failure.
#[derive(Debug, Default)]
pub struct StatementParser;

impl StatementParser {
    pub fn new() -> Self {
        StatementParser
    }

    pub fn parse(&self, path: &Path) -> Result<Vec<ParsedTransaction>, StatementError> {
        let data = std::fs::read(path)?;
        self.parse_bytes(&data)
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<Vec<ParsedTransaction>, StatementError> {
        let data = data.strip_prefix(&UTF8_BOM[..]).unwrap_or(data);
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(StatementError::EmptyFile);
        }

        let delimiter = detect_delimiter(data)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(data);

        let headers = reader.headers()?.clone();
        let columns = ColumnMap::detect(&headers)?;

        let mut transactions = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(row = index + 1, "skipping unreadable row: {e}");
                    continue;
                }
            };
            if record.is_empty() {
                continue;
            }

            match parse_row(&headers, &record, &columns) {
                Ok(Some(tx)) => transactions.push(tx),
                Ok(None) => {}
                Err(e) => {
                    warn!(row = index + 1, "skipping row: {e}");
                }
            }
        }

        if transactions.is_empty() {
            return Err(StatementError::NoValidTransactions);
        }

        Ok(transactions)
    }
}

/// Probes the common delimiters in order, accepting the first that splits
/// the header into more than one column. Falls back to picking the most
/// frequent delimiter byte in the first line.
fn detect_delimiter(data: &[u8]) -> Result<u8, StatementError> {
    for delimiter in DELIMITERS {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(data);
        if let Ok(headers) = reader.headers() {
            if headers.len() > 1 {
                return Ok(delimiter);
            }
        }
    }

    let first_line = data.split(|b| *b == b'\n').next().unwrap_or(data);
    DELIMITERS
        .into_iter()
        .map(|d| (d, first_line.iter().filter(|b| **b == d).count()))
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(_, count)| *count)
        .map(|(d, _)| d)
        .ok_or(StatementError::NoDelimiter)
}

fn parse_row(
    headers: &csv::StringRecord,
    record: &csv::StringRecord,
    columns: &ColumnMap,
) -> Result<Option<ParsedTransaction>, RowError> {
    let cell = |idx: usize| record.get(idx).unwrap_or_default().trim();

    let date_str = cell(columns.date);
    if date_str.is_empty() {
        return Ok(None);
    }
    let date = parse_date(date_str).ok_or_else(|| RowError::InvalidDate(date_str.to_string()))?;

    let description = cell(columns.description);
    let description = if description.is_empty() {
        "Unknown Transaction".to_string()
    } else {
        description.to_string()
    };

    let amount = match columns.amount {
        Some(idx) => match parse_amount(cell(idx))? {
            Some(amount) => amount,
            None => return Ok(None),
        },
        None => {
            let debit = columns
                .debit
                .map(|idx| parse_amount(cell(idx)))
                .transpose()?
                .flatten();
            let credit = columns
                .credit
                .map(|idx| parse_amount(cell(idx)))
                .transpose()?
                .flatten();

            // Accounting convention from the customer's perspective:
            // money in (credit) is positive, money out (debit) is negative.
            match (credit, debit) {
                (Some(c), _) if !c.is_zero() => c.abs(),
                (_, Some(d)) if !d.is_zero() => -d.abs(),
                _ => return Ok(None),
            }
        }
    };

    // Balance is optional metadata; a malformed balance never rejects the row.
    let balance = columns
        .balance
        .and_then(|idx| parse_amount(cell(idx)).ok())
        .flatten();

    let raw_data: RawRow = headers
        .iter()
        .zip(record.iter())
        .map(|(h, v)| (h.to_string(), v.to_string()))
        .collect();

    Ok(Some(ParsedTransaction {
        date,
        description,
        amount,
        balance,
        raw_data,
        account_id: None,
    }))
}

/// Month-first formats are tried before day-first, matching the behavior
/// of most bank exports this parser sees.
const MONTH_FIRST_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DAY_FIRST_FORMATS: [&str; 6] = [
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d/%m/%y",
    "%d %b %Y",
    "%d %B %Y",
];

fn parse_date(s: &str) -> Option<NaiveDate> {
    MONTH_FIRST_FORMATS
        .iter()
        .chain(DAY_FIRST_FORMATS.iter())
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parses an amount cell, tolerating currency symbols, accounting-style
/// parentheses, and both US and European digit grouping.
///
/// Returns `Ok(None)` for a blank cell — the row decides whether that
/// means "skip" (no amount at all) or "zero" (empty debit leg).
fn parse_amount(s: &str) -> Result<Option<Money>, RowError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, '$' | '£' | '€' | '¥' | '₹') && !c.is_whitespace())
        .collect();

    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    let comma = cleaned.rfind(',');
    let point = cleaned.rfind('.');
    cleaned = match (comma, point) {
        (Some(c), Some(p)) if c > p => {
            // European grouping: 1.234,56
            cleaned.replace('.', "").replace(',', ".")
        }
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(c), None) => {
            // A lone comma is decimal only when exactly two digits follow.
            let decimals = cleaned.len() - c - 1;
            let all_digits = cleaned[c + 1..].bytes().all(|b| b.is_ascii_digit());
            if decimals == 2 && all_digits {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        _ => cleaned,
    };

    let value = Decimal::from_str(&cleaned)
        .map_err(|_| RowError::InvalidAmount(s.trim().to_string()))?;
    let value = if negative { -value.abs() } else { value };
    Ok(Some(Money::from_decimal(value)))
}
