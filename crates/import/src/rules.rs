use serde::{Deserialize, Serialize};

use pecunia_core::CategoryId;

/// Minimum confidence for a rule match to count at all.
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// A substring categorization rule. Patterns are stored uppercased;
/// higher priority rules are consulted first and win confidence ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    #[serde(default)]
    pub id: Option<i64>,
    pub pattern: String,
    pub category_id: i64,
    #[serde(default)]
    pub priority: i32,
}

impl CategoryRule {
    pub fn category(&self) -> CategoryId {
        CategoryId(self.category_id)
    }
}

#[derive(Debug, Clone)]
pub struct RuleMatch<'a> {
    pub rule: &'a CategoryRule,
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<CategoryRule>,
}

/// Pattern-based transaction categorizer.
///
/// Not a scoring model: plain case-insensitive containment with a small
/// confidence ladder (exact 1.0, pattern-in-description 0.9,
/// description-in-pattern 0.7).
pub struct RuleEngine {
    rules: Vec<CategoryRule>,
}

impl RuleEngine {
    pub fn new(mut rules: Vec<CategoryRule>) -> Self {
        for rule in &mut rules {
            rule.pattern = rule.pattern.trim().to_uppercase();
        }
        // Highest priority first.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    /// Loads rules from a TOML document with `[[rules]]` entries.
    pub fn from_toml(toml_content: &str) -> Result<Self, toml::de::Error> {
        let file: RuleFile = toml::from_str(toml_content)?;
        Ok(Self::new(file.rules))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns the best-scoring rule at or above the confidence floor.
    pub fn best_match(&self, description: &str) -> Option<RuleMatch<'_>> {
        let text = description.trim().to_uppercase();
        if text.is_empty() {
            return None;
        }

        let mut best: Option<RuleMatch<'_>> = None;
        for rule in &self.rules {
            let confidence = match_confidence(&text, &rule.pattern);
            if confidence > best.as_ref().map_or(0.0, |m| m.confidence) {
                best = Some(RuleMatch { rule, confidence });
            }
        }

        best.filter(|m| m.confidence >= LOW_CONFIDENCE_THRESHOLD)
    }
}

fn match_confidence(text: &str, pattern: &str) -> f64 {
    if pattern.is_empty() {
        return 0.0;
    }
    if text == pattern {
        1.0
    } else if text.contains(pattern) {
        0.9
    } else if pattern.contains(text) {
        0.7
    } else {
        0.0
    }
}
