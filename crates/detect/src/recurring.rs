use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pecunia_core::text::{merchant_name, similarity_ratio, strip_reference_digits};
use pecunia_core::{CategoryId, Money, StoredTransaction, TransactionId};

/// Canonical recurrence cadences, each with a day tolerance that absorbs
/// calendar drift (28-31 day months, bank-holiday shifts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Frequency {
    pub const ALL: [Frequency; 5] = [
        Frequency::Weekly,
        Frequency::Biweekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Annual,
    ];

    pub fn canonical_days(self) -> i64 {
        match self {
            Frequency::Weekly => 7,
            Frequency::Biweekly => 14,
            Frequency::Monthly => 30,
            Frequency::Quarterly => 90,
            Frequency::Annual => 365,
        }
    }

    pub fn tolerance_days(self) -> i64 {
        match self {
            Frequency::Weekly => 2,
            Frequency::Biweekly => 3,
            Frequency::Monthly => 3,
            Frequency::Quarterly => 7,
            Frequency::Annual => 14,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Annual => "annual",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            "annual" => Ok(Frequency::Annual),
            other => Err(format!("unknown frequency: '{other}'")),
        }
    }
}

/// A detected recurring payment. The detector computes these fresh on
/// every scan; persisting them (and their instance records) is the
/// storage layer's job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringPattern {
    pub merchant_name: String,
    pub description_pattern: String,
    pub frequency: Frequency,
    /// Mean absolute amount across the group.
    pub average_amount: Money,
    /// Largest absolute deviation of any one transaction from the mean.
    pub amount_variance: Money,
    pub category_id: Option<CategoryId>,
    pub last_transaction_date: NaiveDate,
    pub next_expected_date: NaiveDate,
    pub confidence_score: f64,
    pub transaction_count: usize,
    pub transaction_ids: Vec<TransactionId>,
}

/// Detects recurring payments (subscriptions, bills) in a debit history.
///
/// Stateless: every call re-derives everything from the slice it is given,
/// so two scans over the same history produce identical patterns.
#[derive(Debug, Clone)]
pub struct RecurringPatternDetector {
    pub min_occurrences: usize,
    pub min_similarity: f64,
    pub max_amount_variance: f64,
}

impl RecurringPatternDetector {
    pub const MIN_OCCURRENCES: usize = 3;
    pub const MIN_SIMILARITY: f64 = 0.85;
    pub const MAX_AMOUNT_VARIANCE: f64 = 0.10;
    pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.75;

    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `transactions` for recurring patterns with confidence at or
    /// above `min_confidence`. Only debits (amount < 0) are considered;
    /// anything else in the slice is ignored.
    pub fn detect(
        &self,
        transactions: &[StoredTransaction],
        min_confidence: f64,
    ) -> Vec<RecurringPattern> {
        let debits: Vec<&StoredTransaction> = transactions
            .iter()
            .filter(|tx| tx.amount.is_negative())
            .collect();

        let mut patterns = Vec::new();
        for group in self.group_by_similarity(&debits) {
            if let Some(pattern) = self.analyze_group(group, min_confidence) {
                patterns.push(pattern);
            }
        }
        patterns
    }

    /// Checks whether a single transaction belongs to a previously saved
    /// pattern: similar description and amount within the variance gate.
    pub fn matches_pattern(
        &self,
        description: &str,
        amount: Money,
        pattern_description: &str,
        pattern_average: Money,
    ) -> bool {
        if !self.is_similar(description, pattern_description) {
            return false;
        }
        let avg = pattern_average.to_f64().abs();
        if avg <= 0.0 {
            return false;
        }
        let diff = (amount.to_f64().abs() - avg).abs();
        diff / avg <= self.max_amount_variance
    }

    /// Greedy first-match-wins clustering: each transaction seeds a group
    /// and claims every later unclaimed transaction with a similar
    /// description. O(n²) pairwise, bounded by realistic history sizes.
    fn group_by_similarity<'a>(
        &self,
        transactions: &[&'a StoredTransaction],
    ) -> Vec<Vec<&'a StoredTransaction>> {
        let mut groups = Vec::new();
        let mut claimed = vec![false; transactions.len()];

        for i in 0..transactions.len() {
            if claimed[i] {
                continue;
            }
            claimed[i] = true;
            let mut group = vec![transactions[i]];

            for j in (i + 1)..transactions.len() {
                if claimed[j] {
                    continue;
                }
                if self.is_similar(&transactions[i].description, &transactions[j].description) {
                    claimed[j] = true;
                    group.push(transactions[j]);
                }
            }

            if group.len() >= self.min_occurrences {
                groups.push(group);
            }
        }

        groups
    }

    fn is_similar(&self, desc1: &str, desc2: &str) -> bool {
        if desc1.is_empty() || desc2.is_empty() {
            return false;
        }
        let a = strip_reference_digits(desc1);
        let b = strip_reference_digits(desc2);
        similarity_ratio(&a, &b) >= self.min_similarity
    }

    fn analyze_group(
        &self,
        mut group: Vec<&StoredTransaction>,
        min_confidence: f64,
    ) -> Option<RecurringPattern> {
        group.sort_by_key(|tx| tx.date);

        let dates: Vec<NaiveDate> = group.iter().map(|tx| tx.date).collect();
        let intervals = day_intervals(&dates);
        let (frequency, freq_confidence) = detect_frequency(&intervals)?;

        let amounts: Vec<Decimal> = group
            .iter()
            .map(|tx| tx.amount.abs().as_decimal())
            .collect();
        // Amount stability is a hard gate, not a score factor.
        let (average, max_deviation, variance_ratio) = amount_spread(&amounts)?;
        if variance_ratio > self.max_amount_variance {
            return None;
        }

        let occurrence_bonus = (0.1 * (group.len() as f64 - 3.0)).min(0.2);
        let confidence = freq_confidence * 0.5
            + (1.0 - variance_ratio) * 0.3
            + 0.2
            + occurrence_bonus;
        let confidence = ((confidence.min(1.0)) * 100.0).round() / 100.0;
        if confidence < min_confidence {
            return None;
        }

        let first = group[0];
        let last_date = *dates.last().expect("group is non-empty");

        Some(RecurringPattern {
            merchant_name: merchant_name(&first.description),
            description_pattern: first.description.chars().take(100).collect(),
            frequency,
            average_amount: Money::from_decimal(average),
            amount_variance: Money::from_decimal(max_deviation),
            category_id: dominant_category(&group),
            last_transaction_date: last_date,
            next_expected_date: last_date + Duration::days(frequency.canonical_days()),
            confidence_score: confidence,
            transaction_count: group.len(),
            transaction_ids: group.iter().map(|tx| tx.id).collect(),
        })
    }
}

impl Default for RecurringPatternDetector {
    fn default() -> Self {
        Self {
            min_occurrences: Self::MIN_OCCURRENCES,
            min_similarity: Self::MIN_SIMILARITY,
            max_amount_variance: Self::MAX_AMOUNT_VARIANCE,
        }
    }
}

fn day_intervals(dates: &[NaiveDate]) -> Vec<i64> {
    dates
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_days())
        .collect()
}

/// Classifies a set of day intervals against the canonical frequencies.
///
/// A frequency qualifies only when the mean interval falls within its
/// tolerance AND every individual interval does too; its confidence is
/// `1 − mean_deviation/tolerance`. Returns the best qualifying frequency,
/// or `None` when nothing reaches confidence 0.5.
fn detect_frequency(intervals: &[i64]) -> Option<(Frequency, f64)> {
    if intervals.len() < 2 {
        return None;
    }

    let mean = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;

    let mut best: Option<(Frequency, f64)> = None;
    for frequency in Frequency::ALL {
        let expected = frequency.canonical_days() as f64;
        let tolerance = frequency.tolerance_days() as f64;

        if (mean - expected).abs() > tolerance {
            continue;
        }

        let deviations: Vec<f64> = intervals
            .iter()
            .map(|i| (*i as f64 - expected).abs())
            .collect();
        let max_deviation = deviations.iter().cloned().fold(0.0, f64::max);
        if max_deviation > tolerance {
            continue;
        }

        let mean_deviation = deviations.iter().sum::<f64>() / deviations.len() as f64;
        let confidence = (1.0 - mean_deviation / tolerance).clamp(0.0, 1.0);
        if best.as_ref().map_or(true, |(_, c)| confidence > *c) {
            best = Some((frequency, confidence));
        }
    }

    best.filter(|(_, confidence)| *confidence >= 0.5)
}

/// Returns `(mean, max_absolute_deviation, max_relative_deviation)` over
/// absolute amounts, or `None` for an empty or all-zero group.
fn amount_spread(amounts: &[Decimal]) -> Option<(Decimal, Decimal, f64)> {
    use rust_decimal::prelude::ToPrimitive;

    if amounts.is_empty() {
        return None;
    }
    let average = amounts.iter().sum::<Decimal>() / Decimal::from(amounts.len() as i64);
    if average.is_zero() {
        return None;
    }
    let max_deviation = amounts
        .iter()
        .map(|a| (*a - average).abs())
        .max()
        .unwrap_or(Decimal::ZERO);
    let ratio = (max_deviation / average).to_f64().unwrap_or(f64::MAX);
    Some((average, max_deviation, ratio))
}

fn dominant_category(group: &[&StoredTransaction]) -> Option<CategoryId> {
    let categories: Vec<CategoryId> = group.iter().filter_map(|tx| tx.category_id).collect();
    // Mode, first-encountered wins ties.
    let mut best: Option<(CategoryId, usize)> = None;
    for category in &categories {
        let count = categories.iter().filter(|c| *c == category).count();
        if best.map_or(true, |(_, n)| count > n) {
            best = Some((*category, count));
        }
    }
    best.map(|(category, _)| category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pecunia_core::AccountId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tx(id: i64, d: NaiveDate, desc: &str, cents: i64) -> StoredTransaction {
        tx_in_category(id, d, desc, cents, None)
    }

    fn tx_in_category(
        id: i64,
        d: NaiveDate,
        desc: &str,
        cents: i64,
        category: Option<i64>,
    ) -> StoredTransaction {
        StoredTransaction {
            id: TransactionId(id),
            account_id: AccountId(1),
            date: d,
            description: desc.to_string(),
            amount: Money::from_cents(cents),
            category_id: category.map(CategoryId),
        }
    }

    fn monthly_netflix(count: i64) -> Vec<StoredTransaction> {
        (0..count)
            .map(|i| {
                tx(
                    i + 1,
                    date(2025, 1, 5) + Duration::days(30 * i),
                    "NETFLIX.COM",
                    -1599,
                )
            })
            .collect()
    }

    // ── detect_frequency ──────────────────────────────────────────────────────

    #[test]
    fn perfectly_monthly_intervals_score_above_point_nine() {
        let (frequency, confidence) = detect_frequency(&[30, 30, 30]).unwrap();
        assert_eq!(frequency, Frequency::Monthly);
        assert!(confidence > 0.9);
    }

    #[test]
    fn irregular_intervals_have_no_frequency() {
        assert_eq!(detect_frequency(&[3, 45, 12, 89]), None);
    }

    #[test]
    fn single_interval_is_not_enough() {
        assert_eq!(detect_frequency(&[30]), None);
    }

    #[test]
    fn weekly_with_drift_still_classifies() {
        let (frequency, confidence) = detect_frequency(&[7, 8, 6, 7]).unwrap();
        assert_eq!(frequency, Frequency::Weekly);
        assert!(confidence > 0.5);
    }

    #[test]
    fn one_outlier_interval_disqualifies_the_frequency() {
        // Mean of [30, 26, 34] is exactly monthly but two intervals fall
        // outside the per-interval tolerance.
        assert_eq!(detect_frequency(&[30, 26, 34]), None);
    }

    #[test]
    fn quarterly_and_annual_cadences() {
        assert_eq!(
            detect_frequency(&[90, 91, 89]).map(|(f, _)| f),
            Some(Frequency::Quarterly)
        );
        assert_eq!(
            detect_frequency(&[365, 366]).map(|(f, _)| f),
            Some(Frequency::Annual)
        );
    }

    // ── amount consistency ────────────────────────────────────────────────────

    #[test]
    fn wide_amount_spread_is_rejected() {
        let txs = vec![
            tx(1, date(2025, 1, 1), "GYM", -10000),
            tx(2, date(2025, 1, 31), "GYM", -15000),
            tx(3, date(2025, 3, 2), "GYM", -8000),
        ];
        assert!(RecurringPatternDetector::new().detect(&txs, 0.0).is_empty());
    }

    #[test]
    fn tight_amount_spread_is_accepted() {
        let txs = vec![
            tx(1, date(2025, 1, 1), "GYM", -10000),
            tx(2, date(2025, 1, 31), "GYM", -10500),
            tx(3, date(2025, 3, 2), "GYM", -9800),
        ];
        let patterns = RecurringPatternDetector::new().detect(&txs, 0.0);
        assert_eq!(patterns.len(), 1);
    }

    // ── end-to-end detection ──────────────────────────────────────────────────

    #[test]
    fn five_monthly_netflix_charges_form_one_pattern() {
        let patterns =
            RecurringPatternDetector::new().detect(&monthly_netflix(5), 0.75);
        assert_eq!(patterns.len(), 1);

        let p = &patterns[0];
        assert_eq!(p.frequency, Frequency::Monthly);
        assert_eq!(p.average_amount, Money::from_cents(1599));
        assert_eq!(p.transaction_count, 5);
        assert_eq!(p.transaction_ids.len(), 5);
        assert!(p.confidence_score > 0.8);
        assert_eq!(p.merchant_name, "NETFLIX.COM");
        assert_eq!(p.last_transaction_date, date(2025, 1, 5) + Duration::days(120));
        assert_eq!(
            p.next_expected_date,
            p.last_transaction_date + Duration::days(30)
        );
    }

    #[test]
    fn reference_codes_do_not_split_the_group() {
        let txs = vec![
            tx(1, date(2025, 1, 5), "NETFLIX #123", -1599),
            tx(2, date(2025, 2, 4), "NETFLIX #456", -1599),
            tx(3, date(2025, 3, 6), "NETFLIX #789", -1599),
        ];
        let patterns = RecurringPatternDetector::new().detect(&txs, 0.75);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].merchant_name, "NETFLIX");
    }

    #[test]
    fn two_occurrences_are_not_a_pattern() {
        let patterns = RecurringPatternDetector::new().detect(&monthly_netflix(2), 0.0);
        assert!(patterns.is_empty());
    }

    #[test]
    fn credits_are_ignored() {
        let txs: Vec<StoredTransaction> = (0..5)
            .map(|i| {
                tx(
                    i + 1,
                    date(2025, 1, 5) + Duration::days(30 * i),
                    "SALARY",
                    250000,
                )
            })
            .collect();
        assert!(RecurringPatternDetector::new().detect(&txs, 0.0).is_empty());
    }

    #[test]
    fn confidence_floor_filters_marginal_patterns() {
        // Intervals [28, 32, 30]: monthly, but with enough drift that the
        // overall confidence lands near 0.88.
        let txs = vec![
            tx(1, date(2025, 1, 1), "GYM", -10000),
            tx(2, date(2025, 1, 29), "GYM", -10000),
            tx(3, date(2025, 3, 2), "GYM", -10000),
            tx(4, date(2025, 4, 1), "GYM", -10000),
        ];
        let detector = RecurringPatternDetector::new();
        assert!(detector.detect(&txs, 0.95).is_empty());
        assert_eq!(detector.detect(&txs, 0.6).len(), 1);
    }

    #[test]
    fn dominant_category_is_the_mode() {
        let txs = vec![
            tx_in_category(1, date(2025, 1, 5), "SPOTIFY", -999, Some(4)),
            tx_in_category(2, date(2025, 2, 4), "SPOTIFY", -999, Some(7)),
            tx_in_category(3, date(2025, 3, 6), "SPOTIFY", -999, Some(4)),
        ];
        let patterns = RecurringPatternDetector::new().detect(&txs, 0.0);
        assert_eq!(patterns[0].category_id, Some(CategoryId(4)));
    }

    #[test]
    fn detection_is_idempotent() {
        let txs = monthly_netflix(5);
        let detector = RecurringPatternDetector::new();
        assert_eq!(detector.detect(&txs, 0.75), detector.detect(&txs, 0.75));
    }

    #[test]
    fn empty_history_yields_no_patterns() {
        assert!(RecurringPatternDetector::new().detect(&[], 0.75).is_empty());
    }

    #[test]
    fn matches_pattern_checks_description_and_amount() {
        let detector = RecurringPatternDetector::new();
        let avg = Money::from_cents(1599);
        assert!(detector.matches_pattern("NETFLIX.COM #999", Money::from_cents(-1599), "NETFLIX.COM #1", avg));
        assert!(detector.matches_pattern("NETFLIX.COM #999", Money::from_cents(-1699), "NETFLIX.COM #1", avg));
        // 50% price jump fails the variance gate.
        assert!(!detector.matches_pattern("NETFLIX.COM #999", Money::from_cents(-2400), "NETFLIX.COM #1", avg));
        assert!(!detector.matches_pattern("HARDWARE STORE", Money::from_cents(-1599), "NETFLIX.COM #1", avg));
    }
}
