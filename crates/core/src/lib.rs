pub mod money;
pub mod text;
pub mod transaction;
pub mod validate;

pub use money::Money;
pub use transaction::{
    AccountId, CategoryId, ParsedTransaction, RawRow, StoredTransaction, TransactionId,
};
pub use validate::{ValidationIssue, ValidationResult, Validator};
