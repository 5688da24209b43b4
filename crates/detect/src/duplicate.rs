use serde::Serialize;

use pecunia_core::text::{normalize_description, similarity_ratio};
use pecunia_core::{Money, ParsedTransaction, StoredTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    High,
    Possible,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub existing: StoredTransaction,
    pub confidence: f64,
    pub match_type: MatchType,
}

/// The outcome of one duplicate check. `matches` holds every candidate at
/// or above the possible-match floor, best first, for manual-review UIs.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateVerdict {
    pub transaction: ParsedTransaction,
    pub is_duplicate: bool,
    pub confidence: f64,
    pub matches: Vec<DuplicateMatch>,
}

/// Multi-factor duplicate scorer for candidate imports.
///
/// Pure over its inputs: the caller supplies the persisted transactions
/// (typically prefiltered by the storage layer's date/amount window query),
/// and the detector re-applies the window itself, so an unfiltered slice
/// yields the same verdict. Duplicate checking is advisory — malformed
/// candidates degrade to a clean verdict, they never raise.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    pub date_tolerance_days: i64,
    pub amount_tolerance_percent: f64,
}

impl DuplicateDetector {
    pub const EXACT_MATCH_THRESHOLD: f64 = 1.0;
    pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;
    pub const POSSIBLE_MATCH_THRESHOLD: f64 = 0.6;
    pub const DATE_TOLERANCE_DAYS: i64 = 2;
    pub const AMOUNT_TOLERANCE_PERCENT: f64 = 5.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        candidate: &ParsedTransaction,
        existing: &[StoredTransaction],
    ) -> DuplicateVerdict {
        let account_id = match candidate.account_id {
            Some(id) => id,
            None => return self.clean_verdict(candidate),
        };
        if candidate.description.trim().is_empty() {
            return self.clean_verdict(candidate);
        }

        let amount_tolerance =
            candidate.amount.to_f64().abs() * (self.amount_tolerance_percent / 100.0);

        let mut matches: Vec<DuplicateMatch> = existing
            .iter()
            .filter(|tx| tx.account_id == account_id)
            .filter(|tx| {
                (tx.date - candidate.date).num_days().abs() <= self.date_tolerance_days
            })
            .filter(|tx| {
                (tx.amount.to_f64() - candidate.amount.to_f64()).abs() <= amount_tolerance
            })
            .filter_map(|tx| {
                let confidence = self.confidence(candidate, tx);
                (confidence >= Self::POSSIBLE_MATCH_THRESHOLD).then(|| DuplicateMatch {
                    existing: tx.clone(),
                    confidence,
                    match_type: match_type_for(confidence),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let best = matches.first().map(|m| m.confidence).unwrap_or(0.0);
        DuplicateVerdict {
            transaction: candidate.clone(),
            is_duplicate: best >= Self::HIGH_CONFIDENCE_THRESHOLD,
            confidence: best,
            matches,
        }
    }

    /// Weighted score: 30% date proximity, 40% amount proximity, 30%
    /// description similarity. Rounded to two decimals.
    fn confidence(&self, candidate: &ParsedTransaction, existing: &StoredTransaction) -> f64 {
        let days_diff = (candidate.date - existing.date).num_days().abs();
        let date_score = if days_diff == 0 {
            1.0
        } else {
            (1.0 - days_diff as f64 / self.date_tolerance_days as f64).max(0.0)
        };

        let amount_score = amount_score(
            candidate.amount,
            existing.amount,
            self.amount_tolerance_percent,
        );

        let desc1 = normalize_description(&candidate.description);
        let desc2 = normalize_description(&existing.description);
        let description_score = if desc1.is_empty() || desc2.is_empty() {
            0.0
        } else {
            similarity_ratio(&desc1, &desc2)
        };

        let confidence = date_score * 0.3 + amount_score * 0.4 + description_score * 0.3;
        (confidence * 100.0).round() / 100.0
    }

    fn clean_verdict(&self, candidate: &ParsedTransaction) -> DuplicateVerdict {
        DuplicateVerdict {
            transaction: candidate.clone(),
            is_duplicate: false,
            confidence: 0.0,
            matches: Vec::new(),
        }
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            date_tolerance_days: Self::DATE_TOLERANCE_DAYS,
            amount_tolerance_percent: Self::AMOUNT_TOLERANCE_PERCENT,
        }
    }
}

fn amount_score(a: Money, b: Money, tolerance_percent: f64) -> f64 {
    // Sub-cent difference counts as an exact amount match.
    if (a - b).abs() < Money::from_cents(1) {
        return 1.0;
    }
    let avg = (a.to_f64().abs() + b.to_f64().abs()) / 2.0;
    if avg <= 0.0 {
        return 0.0;
    }
    let percent_diff = (a.to_f64() - b.to_f64()).abs() / avg * 100.0;
    (1.0 - percent_diff / tolerance_percent).max(0.0)
}

fn match_type_for(confidence: f64) -> MatchType {
    if confidence >= DuplicateDetector::EXACT_MATCH_THRESHOLD {
        MatchType::Exact
    } else if confidence >= DuplicateDetector::HIGH_CONFIDENCE_THRESHOLD {
        MatchType::High
    } else {
        MatchType::Possible
    }
}
