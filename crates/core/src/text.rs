//! Text normalization and similarity primitives shared by the import rule
//! engine and both detectors.

/// Words that carry no signal when comparing statement descriptions.
const FILLER_WORDS: &[&str] = &["transaction", "payment", "purchase", "debit", "credit"];

/// Levenshtein edit distance using the two-row O(min(m,n)) space algorithm.
pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Keep the shorter string in the inner loop to minimise allocation.
    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized Levenshtein similarity in [0.0, 1.0]. Two empty strings are
/// considered identical.
pub fn similarity_ratio(s1: &str, s2: &str) -> f64 {
    if s1 == s2 {
        return 1.0;
    }
    let max_len = s1.chars().count().max(s2.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(s1, s2) as f64 / max_len as f64)
}

/// Normalizes a description for duplicate comparison: lowercase, collapsed
/// whitespace, filler words removed.
pub fn normalize_description(description: &str) -> String {
    description
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !FILLER_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercases and drops `#` and digit characters so that variable location
/// or reference codes don't break grouping (NETFLIX #123 == NETFLIX #456).
pub fn strip_reference_digits(description: &str) -> String {
    description
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_digit() && *c != '#')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Extracts a display-friendly merchant name: uppercase, `#123` location
/// codes and runs of 3+ digits removed, whitespace collapsed, at most 50
/// characters.
pub fn merchant_name(description: &str) -> String {
    let upper = description.to_uppercase();
    let chars: Vec<char> = upper.chars().collect();
    let mut kept = String::with_capacity(chars.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '#' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit() {
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            // Short numbers can be part of the name ("7-ELEVEN", "24 HR").
            if i - start < 3 {
                for d in &chars[start..i] {
                    kept.push(*d);
                }
            }
            continue;
        }
        kept.push(c);
        i += 1;
    }

    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(50)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_identical_strings_are_zero() {
        assert_eq!(levenshtein_distance("abc", "abc"), 0);
        assert_eq!(levenshtein_distance("", ""), 0);
    }

    #[test]
    fn distance_empty_string_is_length_of_other() {
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("abc", ""), 3);
    }

    #[test]
    fn distance_single_edits() {
        assert_eq!(levenshtein_distance("cat", "bat"), 1);
        assert_eq!(levenshtein_distance("abc", "abcd"), 1);
        assert_eq!(levenshtein_distance("abcd", "abc"), 1);
    }

    #[test]
    fn distance_commutative() {
        assert_eq!(
            levenshtein_distance("amazon", "amzn"),
            levenshtein_distance("amzn", "amazon")
        );
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity_ratio("netflix", "netflix"), 1.0);
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
        let score = similarity_ratio("amazon", "starbucks");
        assert!(score < 0.5, "score was {score}");
    }

    #[test]
    fn normalize_removes_filler_words() {
        assert_eq!(
            normalize_description("  DEBIT Purchase   GROCERY Store "),
            "grocery store"
        );
        assert_eq!(normalize_description("Payment"), "");
    }

    #[test]
    fn strip_reference_digits_equates_location_codes() {
        assert_eq!(
            strip_reference_digits("NETFLIX #123"),
            strip_reference_digits("NETFLIX #456")
        );
        assert_eq!(strip_reference_digits("Shop 42"), "shop");
    }

    #[test]
    fn merchant_name_strips_codes_and_long_numbers() {
        assert_eq!(merchant_name("netflix.com #12345"), "NETFLIX.COM");
        assert_eq!(merchant_name("CHECKCARD 0412 STARBUCKS"), "CHECKCARD STARBUCKS");
        assert_eq!(merchant_name("7-eleven store"), "7-ELEVEN STORE");
    }

    #[test]
    fn merchant_name_truncates_to_fifty_chars() {
        let long = "A".repeat(80);
        assert_eq!(merchant_name(&long).chars().count(), 50);
    }
}
