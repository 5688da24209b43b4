use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing_subscriber::EnvFilter;

use pecunia_core::AccountId;
use pecunia_detect::RecurringPatternDetector;
use pecunia_storage::{
    create_account, create_db, import_statement, list_accounts, list_recurring, list_transactions,
    scan_recurring, set_recurring_status, AccountKind, ImportOptions, RecurringStatus,
};

#[derive(Parser)]
#[command(name = "pecunia", version, about = "Bank statement import and analysis")]
struct Cli {
    /// Database file. Defaults to the platform data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and run migrations.
    InitDb,
    /// Register a new account.
    AddAccount {
        name: String,
        /// checking, savings or credit
        #[arg(long, default_value = "checking")]
        kind: AccountKind,
        #[arg(long)]
        institution: Option<String>,
    },
    /// List registered accounts.
    Accounts,
    /// Import a CSV statement into an account.
    Import {
        /// Account id to import into.
        #[arg(long)]
        account: i64,
        /// Statement file to import.
        file: PathBuf,
        /// Archive the statement file after import.
        #[arg(long)]
        archive: bool,
    },
    /// List stored transactions.
    Transactions {
        #[arg(long)]
        account: Option<i64>,
    },
    /// Scan transaction history for recurring payments.
    Scan {
        #[arg(long)]
        account: Option<i64>,
        #[arg(long, default_value_t = RecurringPatternDetector::DEFAULT_MIN_CONFIDENCE)]
        min_confidence: f64,
    },
    /// List saved recurring patterns.
    Recurring {
        /// active, paused or cancelled
        #[arg(long)]
        status: Option<RecurringStatus>,
    },
    /// Change the status of a recurring pattern.
    RecurringStatus {
        id: i64,
        /// active, paused or cancelled
        status: RecurringStatus,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let pool = create_db(&db_path)
        .await
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    match cli.command {
        Command::InitDb => {
            println!("database ready at {}", db_path.display());
        }
        Command::AddAccount {
            name,
            kind,
            institution,
        } => {
            let id = create_account(&pool, &name, kind, institution.as_deref()).await?;
            println!("created account {} ({})", id.0, name);
        }
        Command::Accounts => {
            for account in list_accounts(&pool).await? {
                println!(
                    "{:>4}  {:<10} {} {}",
                    account.id.0,
                    account.kind.as_str(),
                    account.name,
                    account.institution.as_deref().unwrap_or("")
                );
            }
        }
        Command::Import {
            account,
            file,
            archive,
        } => {
            let options = ImportOptions {
                archive_root: archive.then(|| archive_root(&db_path)),
                ..ImportOptions::default()
            };
            let summary = import_statement(&pool, AccountId(account), &file, &options).await?;
            println!(
                "imported {} transactions ({} duplicates skipped, {} invalid, {} matched recurring)",
                summary.imported,
                summary.duplicates_skipped,
                summary.invalid,
                summary.recurring_matched
            );
            println!(
                "credits {}  debits {}",
                summary.total_credits, summary.total_debits
            );
            if let Some(path) = summary.archive_path {
                println!("archived to {}", path.display());
            }
        }
        Command::Transactions { account } => {
            for tx in list_transactions(&pool, account.map(AccountId)).await? {
                println!(
                    "{:>6}  {}  {:>12}  {}",
                    tx.id.0, tx.date, tx.amount, tx.description
                );
            }
        }
        Command::Scan {
            account,
            min_confidence,
        } => {
            let outcome = scan_recurring(&pool, account.map(AccountId), min_confidence).await?;
            println!(
                "detected {} patterns ({} saved, {} already tracked)",
                outcome.detected.len(),
                outcome.saved,
                outcome.skipped
            );
            for pattern in &outcome.detected {
                println!(
                    "  {:<30} {:<10} avg {:>10}  next {}  confidence {:.2}",
                    pattern.merchant_name,
                    pattern.frequency,
                    pattern.average_amount,
                    pattern.next_expected_date,
                    pattern.confidence_score
                );
            }
        }
        Command::Recurring { status } => {
            for rec in list_recurring(&pool, status).await? {
                println!(
                    "{:>4}  {:<30} {:<10} {:<10} avg {:>10}  next {}  {:.2}",
                    rec.id,
                    rec.merchant_name,
                    rec.frequency,
                    rec.status.as_str(),
                    rec.average_amount,
                    rec.next_expected_date,
                    rec.confidence_score
                );
            }
        }
        Command::RecurringStatus { id, status } => {
            set_recurring_status(&pool, id, status).await?;
            println!("recurring {} set to {}", id, status.as_str());
        }
    }

    pool.close().await;
    Ok(())
}

fn default_db_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "pecunia")
        .context("could not determine a data directory for this platform")?;
    Ok(dirs.data_dir().join("pecunia.db"))
}

fn archive_root(db_path: &std::path::Path) -> PathBuf {
    db_path
        .parent()
        .map(|p| p.join("statements"))
        .unwrap_or_else(|| PathBuf::from("statements"))
}
