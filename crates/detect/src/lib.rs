pub mod duplicate;
pub mod recurring;

pub use duplicate::{DuplicateDetector, DuplicateMatch, DuplicateVerdict, MatchType};
pub use recurring::{Frequency, RecurringPattern, RecurringPatternDetector};
