pub mod rules;
pub mod statement;

pub use rules::{CategoryRule, RuleEngine, RuleMatch};
pub use statement::{ColumnKind, ColumnMap, StatementError, StatementParser};
