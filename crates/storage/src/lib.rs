pub mod archive;
pub mod db;
pub mod workflow;

pub use archive::{ArchiveOutcome, StatementArchiver};
pub use db::{
    create_account, create_category, create_db, create_db_in_memory, debit_history,
    find_duplicate_candidates, get_account, get_rules, insert_transaction, list_accounts,
    list_recurring, list_transactions, save_recurring_pattern, save_rule, set_recurring_status,
    AccountKind, AccountRecord, DbPool, RecurringRecord, RecurringStatus, StorageError,
};
pub use workflow::{import_statement, scan_recurring, ImportOptions, ImportSummary, ScanOutcome};
