use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, Utc};

use pecunia_core::{AccountId, Money, Validator};
use pecunia_detect::{DuplicateDetector, RecurringPattern, RecurringPatternDetector};
use pecunia_import::{RuleEngine, StatementParser};

use crate::archive::{ArchiveOutcome, StatementArchiver};
use crate::db::{self, DbPool, RecurringStatus, StorageError};

/// Knobs for one statement import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Clock injection; defaults to the current UTC date.
    pub today: NaiveDate,
    /// When set, imported statements are filed under this directory.
    pub archive_root: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            today: Utc::now().date_naive(),
            archive_root: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub imported: usize,
    pub duplicates_skipped: usize,
    pub invalid: usize,
    /// Imported debits that continued a saved active recurring pattern.
    pub recurring_matched: usize,
    pub total_credits: Money,
    /// Sum of debit magnitudes; reported positive.
    pub total_debits: Money,
    pub archive_path: Option<PathBuf>,
}

/// Parses a statement file and persists its rows for `account_id`.
///
/// Each row passes through validation, duplicate checking against the
/// stored window around its date and amount, and rule-based
/// categorization. Rows that fail validation or score as duplicates are
/// counted and skipped; the import itself only fails on unreadable input
/// or a missing account. Debits that continue a saved active recurring
/// pattern get an instance record and advance that pattern's expectation.
pub async fn import_statement(
    pool: &DbPool,
    account_id: AccountId,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportSummary, StorageError> {
    let account = db::get_account(pool, account_id)
        .await?
        .ok_or(StorageError::AccountNotFound(account_id.0))?;

    let parsed = StatementParser::new().parse(path)?;
    tracing::info!(
        account = %account.name,
        file = %path.display(),
        rows = parsed.len(),
        "parsed statement"
    );

    let validator = Validator::default();
    let duplicates = DuplicateDetector::new();
    let rules = RuleEngine::new(db::get_rules(pool).await?);
    let matcher = RecurringPatternDetector::new();
    let mut recurring = db::list_recurring(pool, Some(RecurringStatus::Active)).await?;

    let mut summary = ImportSummary::default();

    for tx in parsed {
        let tx = tx.with_account(account_id);

        let validation = validator.validate(&tx, options.today);
        if !validation.is_valid() {
            tracing::warn!(
                date = %tx.date,
                description = %tx.description,
                issues = ?validation.issues,
                "skipping invalid transaction"
            );
            summary.invalid += 1;
            continue;
        }

        let window = db::find_duplicate_candidates(
            pool,
            account_id,
            tx.date,
            tx.amount,
            duplicates.date_tolerance_days,
            duplicates.amount_tolerance_percent,
        )
        .await?;
        let verdict = duplicates.check(&tx, &window);
        if verdict.is_duplicate {
            tracing::warn!(
                date = %tx.date,
                description = %tx.description,
                confidence = verdict.confidence,
                "skipping duplicate transaction"
            );
            summary.duplicates_skipped += 1;
            continue;
        }

        let category_id = match rules.best_match(&tx.description) {
            Some(m) => {
                if let Some(rule_id) = m.rule.id {
                    db::bump_rule_match_count(pool, rule_id).await?;
                }
                Some(m.rule.category())
            }
            None => None,
        };

        let transaction_id = db::insert_transaction(
            pool,
            account_id,
            tx.date,
            &tx.description,
            tx.amount,
            category_id,
        )
        .await?;

        if tx.amount.is_negative() {
            if let Some(rec) = recurring.iter_mut().find(|r| {
                matcher.matches_pattern(
                    &tx.description,
                    tx.amount,
                    &r.description_pattern,
                    r.average_amount,
                )
            }) {
                db::record_recurring_instance(pool, rec, transaction_id, tx.date, tx.amount)
                    .await?;
                // Keep the in-memory copy in step for later rows.
                rec.last_transaction_date = tx.date;
                rec.next_expected_date =
                    tx.date + Duration::days(rec.frequency.canonical_days());
                summary.recurring_matched += 1;
            }
            summary.total_debits = summary.total_debits + tx.amount.abs();
        } else {
            summary.total_credits = summary.total_credits + tx.amount;
        }
        summary.imported += 1;
    }

    if let Some(root) = &options.archive_root {
        let archiver = StatementArchiver::new(root);
        match archiver
            .archive(pool, account_id, path, options.today)
            .await?
        {
            ArchiveOutcome::Stored(dest) => summary.archive_path = Some(dest),
            ArchiveOutcome::AlreadyArchived(existing) => {
                summary.archive_path = Some(PathBuf::from(existing))
            }
        }
    }

    tracing::info!(
        imported = summary.imported,
        duplicates = summary.duplicates_skipped,
        invalid = summary.invalid,
        "import finished"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub detected: Vec<RecurringPattern>,
    pub saved: usize,
    pub skipped: usize,
}

/// Runs the recurring-pattern detector over stored debit history and
/// persists new patterns. Patterns whose merchant and frequency already
/// have a non-cancelled record are skipped, so re-scanning is idempotent.
pub async fn scan_recurring(
    pool: &DbPool,
    account: Option<AccountId>,
    min_confidence: f64,
) -> Result<ScanOutcome, StorageError> {
    let history = db::debit_history(pool, account).await?;
    let detected = RecurringPatternDetector::new().detect(&history, min_confidence);
    tracing::info!(
        transactions = history.len(),
        patterns = detected.len(),
        "recurring scan complete"
    );

    let known = db::list_recurring(pool, None).await?;
    let mut outcome = ScanOutcome {
        detected,
        ..Default::default()
    };

    for pattern in &outcome.detected {
        let already_tracked = known.iter().any(|r| {
            r.status != RecurringStatus::Cancelled
                && r.merchant_name == pattern.merchant_name
                && r.frequency == pattern.frequency
        });
        if already_tracked {
            outcome.skipped += 1;
            continue;
        }

        // A save failure should not abort the rest of the scan.
        match db::save_recurring_pattern(pool, pattern).await {
            Ok(_) => {
                tracing::info!(
                    merchant = %pattern.merchant_name,
                    frequency = %pattern.frequency,
                    confidence = pattern.confidence_score,
                    "saved recurring pattern"
                );
                outcome.saved += 1;
            }
            Err(e) => {
                tracing::warn!(
                    merchant = %pattern.merchant_name,
                    "could not save recurring pattern: {e}"
                );
                outcome.skipped += 1;
            }
        }
    }

    Ok(outcome)
}
