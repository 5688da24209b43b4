use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use thiserror::Error;

use pecunia_core::{AccountId, CategoryId, Money, StoredTransaction, TransactionId};
use pecunia_detect::RecurringPattern;
use pecunia_import::{CategoryRule, StatementError};

pub type DbPool = Pool<Sqlite>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Statement(#[from] StatementError),
    #[error("account {0} not found")]
    AccountNotFound(i64),
    #[error("invalid stored date '{0}'")]
    InvalidDate(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Checking,
    Savings,
    Credit,
}

impl AccountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
            AccountKind::Credit => "credit",
        }
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(AccountKind::Checking),
            "savings" => Ok(AccountKind::Savings),
            "credit" => Ok(AccountKind::Credit),
            other => Err(format!("unknown account kind: '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: AccountId,
    pub name: String,
    pub kind: AccountKind,
    pub institution: Option<String>,
}

/// Lifecycle of a saved recurring pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurringStatus {
    Active,
    Paused,
    Cancelled,
}

impl RecurringStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecurringStatus::Active => "active",
            RecurringStatus::Paused => "paused",
            RecurringStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RecurringStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecurringStatus::Active),
            "paused" => Ok(RecurringStatus::Paused),
            "cancelled" => Ok(RecurringStatus::Cancelled),
            other => Err(format!("unknown recurring status: '{other}'")),
        }
    }
}

/// A persisted recurring pattern as read back from storage.
#[derive(Debug, Clone)]
pub struct RecurringRecord {
    pub id: i64,
    pub merchant_name: String,
    pub description_pattern: String,
    pub frequency: pecunia_detect::Frequency,
    pub average_amount: Money,
    pub amount_variance: Money,
    pub category_id: Option<CategoryId>,
    pub last_transaction_date: NaiveDate,
    pub next_expected_date: NaiveDate,
    pub status: RecurringStatus,
    pub confidence_score: f64,
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    connect(options).await
}

/// In-memory database for tests.
pub async fn create_db_in_memory() -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(sqlx::Error::from)?;
    connect(options).await
}

async fn connect(options: SqliteConnectOptions) -> Result<DbPool, StorageError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('checking', 'savings', 'credit')),
            institution TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            parent_id INTEGER,
            kind TEXT NOT NULL CHECK(kind IN ('income', 'expense')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (parent_id) REFERENCES categories(id) ON DELETE CASCADE,
            UNIQUE(name, parent_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            category_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
            FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categorization_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern TEXT NOT NULL UNIQUE,
            category_id INTEGER NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            match_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recurring_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            merchant_name TEXT NOT NULL,
            description_pattern TEXT,
            frequency TEXT NOT NULL
                CHECK(frequency IN ('weekly', 'biweekly', 'monthly', 'quarterly', 'annual')),
            average_amount_cents INTEGER NOT NULL,
            amount_variance_cents INTEGER NOT NULL DEFAULT 0,
            category_id INTEGER,
            last_transaction_date TEXT,
            next_expected_date TEXT,
            status TEXT NOT NULL DEFAULT 'active'
                CHECK(status IN ('active', 'paused', 'cancelled')),
            alert_if_missing INTEGER NOT NULL DEFAULT 1,
            alert_if_amount_changes INTEGER NOT NULL DEFAULT 1,
            confidence_score REAL NOT NULL DEFAULT 0.85,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (category_id) REFERENCES categories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recurring_transaction_instances (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recurring_id INTEGER NOT NULL,
            transaction_id INTEGER,
            expected_date TEXT,
            actual_date TEXT,
            expected_amount_cents INTEGER,
            actual_amount_cents INTEGER,
            variance_cents INTEGER,
            status TEXT NOT NULL DEFAULT 'expected'
                CHECK(status IN ('on_time', 'late', 'missed', 'amount_changed', 'expected')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (recurring_id) REFERENCES recurring_transactions(id) ON DELETE CASCADE,
            FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE SET NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statement_archives (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            original_filename TEXT NOT NULL,
            archive_path TEXT NOT NULL,
            sha256 TEXT NOT NULL UNIQUE,
            imported_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_priority ON categorization_rules(priority DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

fn parse_stored_date(s: &str) -> Result<NaiveDate, StorageError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StorageError::InvalidDate(s.to_string()))
}

// ── accounts & categories ─────────────────────────────────────────────────────

pub async fn create_account(
    pool: &DbPool,
    name: &str,
    kind: AccountKind,
    institution: Option<&str>,
) -> Result<AccountId, StorageError> {
    let result = sqlx::query("INSERT INTO accounts (name, kind, institution) VALUES (?, ?, ?)")
        .bind(name)
        .bind(kind.as_str())
        .bind(institution)
        .execute(pool)
        .await?;
    Ok(AccountId(result.last_insert_rowid()))
}

pub async fn get_account(
    pool: &DbPool,
    id: AccountId,
) -> Result<Option<AccountRecord>, StorageError> {
    let row = sqlx::query_as::<_, (i64, String, String, Option<String>)>(
        "SELECT id, name, kind, institution FROM accounts WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    row.map(|(id, name, kind, institution)| {
        let kind = kind
            .parse::<AccountKind>()
            .map_err(StorageError::InvalidValue)?;
        Ok(AccountRecord {
            id: AccountId(id),
            name,
            kind,
            institution,
        })
    })
    .transpose()
}

pub async fn list_accounts(pool: &DbPool) -> Result<Vec<AccountRecord>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, String, String, Option<String>)>(
        "SELECT id, name, kind, institution FROM accounts ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, name, kind, institution)| {
            let kind = kind
                .parse::<AccountKind>()
                .map_err(StorageError::InvalidValue)?;
            Ok(AccountRecord {
                id: AccountId(id),
                name,
                kind,
                institution,
            })
        })
        .collect()
}

pub async fn create_category(
    pool: &DbPool,
    name: &str,
    kind: &str,
    parent: Option<CategoryId>,
) -> Result<CategoryId, StorageError> {
    let result = sqlx::query("INSERT INTO categories (name, kind, parent_id) VALUES (?, ?, ?)")
        .bind(name)
        .bind(kind)
        .bind(parent.map(|c| c.0))
        .execute(pool)
        .await?;
    Ok(CategoryId(result.last_insert_rowid()))
}

// ── transactions ──────────────────────────────────────────────────────────────

pub async fn insert_transaction(
    pool: &DbPool,
    account_id: AccountId,
    date: NaiveDate,
    description: &str,
    amount: Money,
    category_id: Option<CategoryId>,
) -> Result<TransactionId, StorageError> {
    let result = sqlx::query(
        "INSERT INTO transactions (account_id, date, description, amount_cents, category_id)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(account_id.0)
    .bind(date.to_string())
    .bind(description)
    .bind(amount.to_cents())
    .bind(category_id.map(|c| c.0))
    .execute(pool)
    .await?;
    Ok(TransactionId(result.last_insert_rowid()))
}

type TransactionRow = (i64, i64, String, String, i64, Option<i64>);

fn stored_transaction(row: TransactionRow) -> Result<StoredTransaction, StorageError> {
    let (id, account_id, date, description, amount_cents, category_id) = row;
    Ok(StoredTransaction {
        id: TransactionId(id),
        account_id: AccountId(account_id),
        date: parse_stored_date(&date)?,
        description,
        amount: Money::from_cents(amount_cents),
        category_id: category_id.map(CategoryId),
    })
}

pub async fn list_transactions(
    pool: &DbPool,
    account: Option<AccountId>,
) -> Result<Vec<StoredTransaction>, StorageError> {
    let rows = match account {
        Some(account_id) => {
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, date, description, amount_cents, category_id
                 FROM transactions WHERE account_id = ? ORDER BY date, id",
            )
            .bind(account_id.0)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, date, description, amount_cents, category_id
                 FROM transactions ORDER BY date, id",
            )
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(stored_transaction).collect()
}

/// Coarse prefilter for duplicate checking: same account, date within
/// `± tolerance_days`, amount within `± tolerance_percent`. The detector
/// re-scores everything this returns.
pub async fn find_duplicate_candidates(
    pool: &DbPool,
    account_id: AccountId,
    date: NaiveDate,
    amount: Money,
    tolerance_days: i64,
    tolerance_percent: f64,
) -> Result<Vec<StoredTransaction>, StorageError> {
    let date_start = date - chrono::Duration::days(tolerance_days);
    let date_end = date + chrono::Duration::days(tolerance_days);

    let amount_cents = amount.to_cents();
    let tolerance_cents = ((amount_cents.abs() as f64) * tolerance_percent / 100.0).ceil() as i64;
    let amount_min = amount_cents - tolerance_cents;
    let amount_max = amount_cents + tolerance_cents;

    let rows = sqlx::query_as::<_, TransactionRow>(
        "SELECT id, account_id, date, description, amount_cents, category_id
         FROM transactions
         WHERE account_id = ?
           AND date BETWEEN ? AND ?
           AND amount_cents BETWEEN ? AND ?",
    )
    .bind(account_id.0)
    .bind(date_start.to_string())
    .bind(date_end.to_string())
    .bind(amount_min)
    .bind(amount_max)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(stored_transaction).collect()
}

/// All debit transactions, ordered by description then date — the input
/// shape the recurring detector expects.
pub async fn debit_history(
    pool: &DbPool,
    account: Option<AccountId>,
) -> Result<Vec<StoredTransaction>, StorageError> {
    let rows = match account {
        Some(account_id) => {
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, date, description, amount_cents, category_id
                 FROM transactions WHERE amount_cents < 0 AND account_id = ?
                 ORDER BY description, date",
            )
            .bind(account_id.0)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, TransactionRow>(
                "SELECT id, account_id, date, description, amount_cents, category_id
                 FROM transactions WHERE amount_cents < 0
                 ORDER BY description, date",
            )
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(stored_transaction).collect()
}

// ── categorization rules ──────────────────────────────────────────────────────

pub async fn save_rule(
    pool: &DbPool,
    pattern: &str,
    category_id: CategoryId,
    priority: i32,
) -> Result<i64, StorageError> {
    let result = sqlx::query(
        "INSERT INTO categorization_rules (pattern, category_id, priority) VALUES (?, ?, ?)",
    )
    .bind(pattern.trim().to_uppercase())
    .bind(category_id.0)
    .bind(priority)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_rules(pool: &DbPool) -> Result<Vec<CategoryRule>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, String, i64, i32)>(
        "SELECT id, pattern, category_id, priority
         FROM categorization_rules ORDER BY priority DESC, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, pattern, category_id, priority)| CategoryRule {
            id: Some(id),
            pattern,
            category_id,
            priority,
        })
        .collect())
}

pub async fn bump_rule_match_count(pool: &DbPool, rule_id: i64) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE categorization_rules
         SET match_count = match_count + 1 WHERE id = ?",
    )
    .bind(rule_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ── recurring patterns ────────────────────────────────────────────────────────

/// Persists a detected pattern together with an `on_time` instance record
/// for each historical transaction that produced it, atomically.
pub async fn save_recurring_pattern(
    pool: &DbPool,
    pattern: &RecurringPattern,
) -> Result<i64, StorageError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO recurring_transactions (
            merchant_name, description_pattern, frequency,
            average_amount_cents, amount_variance_cents, category_id,
            last_transaction_date, next_expected_date, status, confidence_score
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
    )
    .bind(&pattern.merchant_name)
    .bind(&pattern.description_pattern)
    .bind(pattern.frequency.as_str())
    .bind(pattern.average_amount.to_cents())
    .bind(pattern.amount_variance.to_cents())
    .bind(pattern.category_id.map(|c| c.0))
    .bind(pattern.last_transaction_date.to_string())
    .bind(pattern.next_expected_date.to_string())
    .bind(pattern.confidence_score)
    .execute(&mut *tx)
    .await?;
    let recurring_id = result.last_insert_rowid();

    for transaction_id in &pattern.transaction_ids {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT date, amount_cents FROM transactions WHERE id = ?",
        )
        .bind(transaction_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((date, amount_cents)) = row {
            let actual = amount_cents.abs();
            let expected = pattern.average_amount.to_cents();
            // Historical occurrences are assumed on time.
            sqlx::query(
                "INSERT INTO recurring_transaction_instances (
                    recurring_id, transaction_id, expected_date, actual_date,
                    expected_amount_cents, actual_amount_cents, variance_cents, status
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 'on_time')",
            )
            .bind(recurring_id)
            .bind(transaction_id.0)
            .bind(&date)
            .bind(&date)
            .bind(expected)
            .bind(actual)
            .bind((actual - expected).abs())
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(recurring_id)
}

type RecurringRow = (
    i64,
    String,
    Option<String>,
    String,
    i64,
    i64,
    Option<i64>,
    String,
    String,
    String,
    f64,
);

fn recurring_record(row: RecurringRow) -> Result<RecurringRecord, StorageError> {
    let (
        id,
        merchant_name,
        description_pattern,
        frequency,
        average_amount_cents,
        amount_variance_cents,
        category_id,
        last_transaction_date,
        next_expected_date,
        status,
        confidence_score,
    ) = row;
    Ok(RecurringRecord {
        id,
        merchant_name,
        description_pattern: description_pattern.unwrap_or_default(),
        frequency: frequency
            .parse()
            .map_err(StorageError::InvalidValue)?,
        average_amount: Money::from_cents(average_amount_cents),
        amount_variance: Money::from_cents(amount_variance_cents),
        category_id: category_id.map(CategoryId),
        last_transaction_date: parse_stored_date(&last_transaction_date)?,
        next_expected_date: parse_stored_date(&next_expected_date)?,
        status: status.parse().map_err(StorageError::InvalidValue)?,
        confidence_score,
    })
}

pub async fn list_recurring(
    pool: &DbPool,
    status: Option<RecurringStatus>,
) -> Result<Vec<RecurringRecord>, StorageError> {
    const COLUMNS: &str = "id, merchant_name, description_pattern, frequency,
        average_amount_cents, amount_variance_cents, category_id,
        last_transaction_date, next_expected_date, status, confidence_score";

    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, RecurringRow>(&format!(
                "SELECT {COLUMNS} FROM recurring_transactions
                 WHERE status = ? ORDER BY confidence_score DESC"
            ))
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, RecurringRow>(&format!(
                "SELECT {COLUMNS} FROM recurring_transactions ORDER BY confidence_score DESC"
            ))
            .fetch_all(pool)
            .await?
        }
    };
    rows.into_iter().map(recurring_record).collect()
}

/// Attaches an observed occurrence to a saved pattern: inserts an instance
/// row (late when the transaction lands past the frequency tolerance) and
/// advances the pattern's last/next expected dates, atomically.
pub async fn record_recurring_instance(
    pool: &DbPool,
    recurring: &RecurringRecord,
    transaction_id: TransactionId,
    actual_date: NaiveDate,
    actual_amount: Money,
) -> Result<i64, StorageError> {
    let days_past = (actual_date - recurring.next_expected_date).num_days();
    let status = if days_past > recurring.frequency.tolerance_days() {
        "late"
    } else {
        "on_time"
    };
    let expected = recurring.average_amount.to_cents();
    let actual = actual_amount.abs().to_cents();

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO recurring_transaction_instances (
            recurring_id, transaction_id, expected_date, actual_date,
            expected_amount_cents, actual_amount_cents, variance_cents, status
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(recurring.id)
    .bind(transaction_id.0)
    .bind(recurring.next_expected_date.to_string())
    .bind(actual_date.to_string())
    .bind(expected)
    .bind(actual)
    .bind((actual - expected).abs())
    .bind(status)
    .execute(&mut *tx)
    .await?;

    let next = actual_date + chrono::Duration::days(recurring.frequency.canonical_days());
    sqlx::query(
        "UPDATE recurring_transactions
         SET last_transaction_date = ?, next_expected_date = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(actual_date.to_string())
    .bind(next.to_string())
    .bind(recurring.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.last_insert_rowid())
}

pub async fn set_recurring_status(
    pool: &DbPool,
    id: i64,
    status: RecurringStatus,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE recurring_transactions
         SET status = ?, updated_at = datetime('now') WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ── statement archives ────────────────────────────────────────────────────────

pub async fn find_archive_by_hash(
    pool: &DbPool,
    sha256: &str,
) -> Result<Option<String>, StorageError> {
    let row = sqlx::query_as::<_, (String,)>(
        "SELECT archive_path FROM statement_archives WHERE sha256 = ?",
    )
    .bind(sha256)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(path,)| path))
}

pub async fn insert_archive(
    pool: &DbPool,
    account_id: AccountId,
    original_filename: &str,
    archive_path: &str,
    sha256: &str,
) -> Result<i64, StorageError> {
    let result = sqlx::query(
        "INSERT INTO statement_archives (account_id, original_filename, archive_path, sha256)
         VALUES (?, ?, ?, ?)",
    )
    .bind(account_id.0)
    .bind(original_filename)
    .bind(archive_path)
    .bind(sha256)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pecunia_detect::{Frequency, RecurringPatternDetector};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn test_db() -> DbPool {
        create_db_in_memory().await.unwrap()
    }

    async fn seed_account(pool: &DbPool) -> AccountId {
        create_account(pool, "Everyday", AccountKind::Checking, Some("Test Bank"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn account_round_trip() {
        let pool = test_db().await;
        let id = seed_account(&pool).await;
        let account = get_account(&pool, id).await.unwrap().unwrap();
        assert_eq!(account.name, "Everyday");
        assert_eq!(account.kind, AccountKind::Checking);
        assert!(get_account(&pool, AccountId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transaction_round_trip() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        insert_transaction(
            &pool,
            account,
            date(2025, 10, 19),
            "Grocery Store",
            Money::from_cents(-4550),
            None,
        )
        .await
        .unwrap();

        let txs = list_transactions(&pool, Some(account)).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].description, "Grocery Store");
        assert_eq!(txs[0].amount, Money::from_cents(-4550));
        assert_eq!(txs[0].date, date(2025, 10, 19));
    }

    #[tokio::test]
    async fn duplicate_window_filters_by_account_date_and_amount() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        let other = create_account(&pool, "Savings", AccountKind::Savings, None)
            .await
            .unwrap();

        let d = date(2025, 10, 19);
        insert_transaction(&pool, account, d, "Grocery", Money::from_cents(-4550), None)
            .await
            .unwrap();
        // Same account, too far in time.
        insert_transaction(
            &pool,
            account,
            d - Duration::days(10),
            "Grocery",
            Money::from_cents(-4550),
            None,
        )
        .await
        .unwrap();
        // Same account, amount outside ±5%.
        insert_transaction(&pool, account, d, "Grocery", Money::from_cents(-9000), None)
            .await
            .unwrap();
        // Different account.
        insert_transaction(&pool, other, d, "Grocery", Money::from_cents(-4550), None)
            .await
            .unwrap();

        let window =
            find_duplicate_candidates(&pool, account, d, Money::from_cents(-4550), 2, 5.0)
                .await
                .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].account_id, account);
    }

    #[tokio::test]
    async fn debit_history_excludes_credits_and_orders_by_description() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        insert_transaction(
            &pool,
            account,
            date(2025, 1, 5),
            "ZIPCAR",
            Money::from_cents(-2000),
            None,
        )
        .await
        .unwrap();
        insert_transaction(
            &pool,
            account,
            date(2025, 1, 6),
            "Salary",
            Money::from_cents(250000),
            None,
        )
        .await
        .unwrap();
        insert_transaction(
            &pool,
            account,
            date(2025, 1, 7),
            "AMAZON",
            Money::from_cents(-1500),
            None,
        )
        .await
        .unwrap();

        let history = debit_history(&pool, Some(account)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].description, "AMAZON");
        assert_eq!(history[1].description, "ZIPCAR");
    }

    #[tokio::test]
    async fn rules_round_trip_in_priority_order() {
        let pool = test_db().await;
        let groceries = create_category(&pool, "Groceries", "expense", None)
            .await
            .unwrap();
        let dining = create_category(&pool, "Dining", "expense", None)
            .await
            .unwrap();
        save_rule(&pool, "whole foods", groceries, 1).await.unwrap();
        save_rule(&pool, "starbucks", dining, 10).await.unwrap();

        let rules = get_rules(&pool).await.unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].pattern, "STARBUCKS");
        assert_eq!(rules[0].priority, 10);
    }

    #[tokio::test]
    async fn recurring_pattern_round_trip_with_instances() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;

        let mut ids = Vec::new();
        for i in 0..5i64 {
            let id = insert_transaction(
                &pool,
                account,
                date(2025, 1, 5) + Duration::days(30 * i),
                "NETFLIX.COM",
                Money::from_cents(-1599),
                None,
            )
            .await
            .unwrap();
            ids.push(id);
        }

        let history = debit_history(&pool, Some(account)).await.unwrap();
        let patterns = RecurringPatternDetector::new().detect(&history, 0.75);
        assert_eq!(patterns.len(), 1);

        let recurring_id = save_recurring_pattern(&pool, &patterns[0]).await.unwrap();

        let saved = list_recurring(&pool, Some(RecurringStatus::Active))
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, recurring_id);
        assert_eq!(saved[0].merchant_name, "NETFLIX.COM");
        assert_eq!(saved[0].frequency, Frequency::Monthly);
        assert_eq!(saved[0].average_amount, Money::from_cents(1599));

        let (instances,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM recurring_transaction_instances WHERE recurring_id = ?",
        )
        .bind(recurring_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(instances, 5);
    }

    #[tokio::test]
    async fn recording_an_instance_advances_the_expectation() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        for i in 0..3i64 {
            insert_transaction(
                &pool,
                account,
                date(2025, 1, 5) + Duration::days(30 * i),
                "NETFLIX.COM",
                Money::from_cents(-1599),
                None,
            )
            .await
            .unwrap();
        }
        let history = debit_history(&pool, Some(account)).await.unwrap();
        let patterns = RecurringPatternDetector::new().detect(&history, 0.75);
        save_recurring_pattern(&pool, &patterns[0]).await.unwrap();
        let rec = list_recurring(&pool, None).await.unwrap().remove(0);

        let occurrence_date = rec.next_expected_date;
        let new_tx = insert_transaction(
            &pool,
            account,
            occurrence_date,
            "NETFLIX.COM",
            Money::from_cents(-1599),
            None,
        )
        .await
        .unwrap();
        record_recurring_instance(&pool, &rec, new_tx, occurrence_date, Money::from_cents(-1599))
            .await
            .unwrap();

        let updated = list_recurring(&pool, None).await.unwrap().remove(0);
        assert_eq!(updated.last_transaction_date, occurrence_date);
        assert_eq!(
            updated.next_expected_date,
            occurrence_date + Duration::days(30)
        );

        let (count, status): (i64, String) = sqlx::query_as(
            "SELECT COUNT(*), MAX(status) FROM recurring_transaction_instances
             WHERE recurring_id = ? AND transaction_id = ?",
        )
        .bind(rec.id)
        .bind(new_tx.0)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(status, "on_time");
    }

    #[tokio::test]
    async fn instance_past_tolerance_is_late() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        for i in 0..3i64 {
            insert_transaction(
                &pool,
                account,
                date(2025, 1, 5) + Duration::days(30 * i),
                "NETFLIX.COM",
                Money::from_cents(-1599),
                None,
            )
            .await
            .unwrap();
        }
        let history = debit_history(&pool, Some(account)).await.unwrap();
        let patterns = RecurringPatternDetector::new().detect(&history, 0.75);
        save_recurring_pattern(&pool, &patterns[0]).await.unwrap();
        let rec = list_recurring(&pool, None).await.unwrap().remove(0);

        // Ten days past the expectation is outside the monthly tolerance.
        let occurrence_date = rec.next_expected_date + Duration::days(10);
        let new_tx = insert_transaction(
            &pool,
            account,
            occurrence_date,
            "NETFLIX.COM",
            Money::from_cents(-1599),
            None,
        )
        .await
        .unwrap();
        record_recurring_instance(&pool, &rec, new_tx, occurrence_date, Money::from_cents(-1599))
            .await
            .unwrap();

        let (status,): (String,) = sqlx::query_as(
            "SELECT status FROM recurring_transaction_instances WHERE transaction_id = ?",
        )
        .bind(new_tx.0)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "late");
    }

    #[tokio::test]
    async fn recurring_status_lifecycle() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        for i in 0..3i64 {
            insert_transaction(
                &pool,
                account,
                date(2025, 1, 5) + Duration::days(30 * i),
                "GYM MEMBERSHIP",
                Money::from_cents(-3500),
                None,
            )
            .await
            .unwrap();
        }
        let history = debit_history(&pool, None).await.unwrap();
        let patterns = RecurringPatternDetector::new().detect(&history, 0.75);
        let id = save_recurring_pattern(&pool, &patterns[0]).await.unwrap();

        set_recurring_status(&pool, id, RecurringStatus::Paused)
            .await
            .unwrap();
        assert!(list_recurring(&pool, Some(RecurringStatus::Active))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            list_recurring(&pool, Some(RecurringStatus::Paused))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn archive_hash_is_unique() {
        let pool = test_db().await;
        let account = seed_account(&pool).await;
        insert_archive(&pool, account, "statement.csv", "/tmp/a", "abc123")
            .await
            .unwrap();
        assert_eq!(
            find_archive_by_hash(&pool, "abc123").await.unwrap(),
            Some("/tmp/a".to_string())
        );
        assert!(find_archive_by_hash(&pool, "zzz").await.unwrap().is_none());
        assert!(insert_archive(&pool, account, "statement.csv", "/tmp/b", "abc123")
            .await
            .is_err());
    }
}
