//! Merchant rules: normalization, matching, and confidence arithmetic
//!
//! Everything here is pure. Storage lives in `db::rules`, orchestration in
//! `apply` and `suggest`. Both the matcher and the propagation search go
//! through [`normalize_merchant`] and [`MerchantPattern::matches`], so they
//! can never disagree on what counts as the same merchant.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{MatchType, Rule};

/// Confidence a rule is created with on its first user decision
pub const SEED_CONFIDENCE: f64 = 0.6;

/// Upper bound reachable through repeated application
pub const CONFIDENCE_CAP: f64 = 0.95;

/// Lower bound reachable through repeated overrides
pub const CONFIDENCE_FLOOR: f64 = 0.05;

/// Smoothing factor for the applied update
const APPLY_RATE: f64 = 0.3;

/// Rules at or above this are reported as high confidence
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Normalize merchant text: trim, case-fold, collapse internal whitespace
pub fn normalize_merchant(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// What happened to a rule when the user made a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOutcome {
    /// The rule's target agreed with the user
    Applied,
    /// The user chose something else
    Overridden,
    /// No prior rule: neither agreement nor override
    Seeded,
}

impl RuleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Overridden => "overridden",
            Self::Seeded => "seeded",
        }
    }
}

/// Pure confidence update: `new = f(old, outcome)`
///
/// Applied moves toward [`CONFIDENCE_CAP`] by exponential smoothing and never
/// exceeds it. Overridden halves, floored at [`CONFIDENCE_FLOOR`]. Seeded
/// leaves the value alone (a fresh rule starts at [`SEED_CONFIDENCE`]).
pub fn next_confidence(old: f64, outcome: RuleOutcome) -> f64 {
    let old = if old.is_finite() {
        old.clamp(0.0, 1.0)
    } else {
        SEED_CONFIDENCE
    };
    match outcome {
        RuleOutcome::Applied => {
            if old >= CONFIDENCE_CAP {
                old
            } else {
                (old + APPLY_RATE * (CONFIDENCE_CAP - old)).min(CONFIDENCE_CAP)
            }
        }
        RuleOutcome::Overridden => (old / 2.0).max(CONFIDENCE_FLOOR).min(old),
        RuleOutcome::Seeded => old,
    }
}

/// A normalized pattern plus how it is compared
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantPattern {
    pub pattern: String,
    pub match_type: MatchType,
}

impl MerchantPattern {
    pub fn new(pattern: &str, match_type: MatchType) -> Self {
        Self {
            pattern: normalize_merchant(pattern),
            match_type,
        }
    }

    /// Match against an already-normalized merchant key
    pub fn matches(&self, merchant_key: &str) -> bool {
        if self.pattern.is_empty() || merchant_key.is_empty() {
            return false;
        }
        match self.match_type {
            MatchType::Exact => merchant_key == self.pattern,
            MatchType::Contains => merchant_key.contains(&self.pattern),
        }
    }
}

impl From<&Rule> for MerchantPattern {
    fn from(rule: &Rule) -> Self {
        Self {
            pattern: rule.pattern.clone(),
            match_type: rule.match_type,
        }
    }
}

/// Pick the best rule among candidates for a normalized merchant
///
/// Non-matching candidates are ignored. Tie-break: exact beats contains,
/// longer pattern beats shorter, higher confidence wins, then lowest id.
pub fn select_best_rule<'a>(
    candidates: impl IntoIterator<Item = &'a Rule>,
    merchant_key: &str,
) -> Option<&'a Rule> {
    candidates
        .into_iter()
        .filter(|rule| MerchantPattern::from(*rule).matches(merchant_key))
        .max_by(|a, b| {
            let exact = |r: &Rule| r.match_type == MatchType::Exact;
            exact(a)
                .cmp(&exact(b))
                .then(a.pattern.chars().count().cmp(&b.pattern.chars().count()))
                .then(a.confidence.total_cmp(&b.confidence))
                .then(b.id.cmp(&a.id))
        })
}

/// Chain-store detection for rule pattern derivation
///
/// A merchant like "countdown ponsonby" learns a `contains "countdown"` rule
/// so every branch of the chain shares it.
#[derive(Debug, Clone)]
pub struct ChainStores {
    chains: Vec<(String, Regex)>,
}

impl ChainStores {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut chains = Vec::with_capacity(names.len());
        for name in names {
            let name = normalize_merchant(name.as_ref());
            if name.is_empty() {
                continue;
            }
            // Chain name followed by a location word
            let re = Regex::new(&format!(r"(^|\s){}\s+\S+", regex::escape(&name)))?;
            chains.push((name, re));
        }
        Ok(Self { chains })
    }

    pub fn empty() -> Self {
        Self { chains: Vec::new() }
    }

    /// Derive the rule pattern a user decision on this merchant should learn
    ///
    /// Returns `None` for an empty merchant.
    pub fn derive_pattern(&self, merchant: &str) -> Option<MerchantPattern> {
        let key = normalize_merchant(merchant);
        if key.is_empty() {
            return None;
        }
        for (name, re) in &self.chains {
            if re.is_match(&key) {
                return Some(MerchantPattern {
                    pattern: name.clone(),
                    match_type: MatchType::Contains,
                });
            }
        }
        Some(MerchantPattern {
            pattern: key,
            match_type: MatchType::Exact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use chrono::Utc;

    fn rule(id: i64, pattern: &str, match_type: MatchType, confidence: f64) -> Rule {
        Rule {
            id,
            pattern: pattern.to_string(),
            match_type,
            classification: Classification::Personal,
            category_id: None,
            confidence,
            times_applied: 1,
            times_overridden: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_merchant() {
        assert_eq!(normalize_merchant("  COUNTDOWN   Ponsonby \t"), "countdown ponsonby");
        assert_eq!(normalize_merchant(""), "");
        assert_eq!(normalize_merchant("   "), "");
    }

    #[test]
    fn test_applied_increases_and_stays_bounded() {
        let mut c = SEED_CONFIDENCE;
        for _ in 0..200 {
            let next = next_confidence(c, RuleOutcome::Applied);
            assert!(next >= c);
            assert!(next <= CONFIDENCE_CAP);
            c = next;
        }
        assert!(next_confidence(0.6, RuleOutcome::Applied) > 0.6);
        assert!((next_confidence(0.6, RuleOutcome::Applied) - 0.705).abs() < 1e-9);
    }

    #[test]
    fn test_overridden_halves_with_floor() {
        assert!((next_confidence(0.8, RuleOutcome::Overridden) - 0.4).abs() < 1e-9);
        assert_eq!(next_confidence(0.06, RuleOutcome::Overridden), CONFIDENCE_FLOOR);
        assert_eq!(next_confidence(0.05, RuleOutcome::Overridden), CONFIDENCE_FLOOR);
        // Never increases, even below the floor
        assert_eq!(next_confidence(0.01, RuleOutcome::Overridden), 0.01);
    }

    #[test]
    fn test_seeded_is_neutral() {
        assert_eq!(next_confidence(0.42, RuleOutcome::Seeded), 0.42);
        assert_eq!(next_confidence(f64::NAN, RuleOutcome::Seeded), SEED_CONFIDENCE);
    }

    #[test]
    fn test_pattern_matching() {
        let exact = MerchantPattern::new("Netflix.com", MatchType::Exact);
        assert!(exact.matches("netflix.com"));
        assert!(!exact.matches("netflix.com au"));

        let contains = MerchantPattern::new("countdown", MatchType::Contains);
        assert!(contains.matches("countdown ponsonby"));
        assert!(!contains.matches("new world"));
        assert!(!contains.matches(""));
    }

    #[test]
    fn test_select_best_prefers_exact_then_length_then_confidence() {
        let rules = vec![
            rule(1, "countdown", MatchType::Contains, 0.9),
            rule(2, "countdown ponsonby", MatchType::Exact, 0.3),
            rule(3, "countdown pon", MatchType::Contains, 0.5),
        ];
        let best = select_best_rule(&rules, "countdown ponsonby").unwrap();
        assert_eq!(best.id, 2);

        let best = select_best_rule(rules[..1].iter().chain(&rules[2..]), "countdown ponsonby")
            .unwrap();
        assert_eq!(best.id, 3, "longer contains pattern wins");

        let tied = vec![
            rule(4, "uber", MatchType::Contains, 0.4),
            rule(5, "uber", MatchType::Contains, 0.7),
        ];
        assert_eq!(select_best_rule(&tied, "uber eats").unwrap().id, 5);
    }

    #[test]
    fn test_select_best_none_when_nothing_matches() {
        let rules = vec![rule(1, "spotify", MatchType::Exact, 0.9)];
        assert!(select_best_rule(&rules, "netflix").is_none());
    }

    #[test]
    fn test_chain_store_derivation() {
        let chains = ChainStores::new(&["Countdown", "new world", "bp"]).unwrap();

        let p = chains.derive_pattern("COUNTDOWN PONSONBY").unwrap();
        assert_eq!(p.pattern, "countdown");
        assert_eq!(p.match_type, MatchType::Contains);

        let p = chains.derive_pattern("New World  Thorndon").unwrap();
        assert_eq!(p.pattern, "new world");

        // Bare chain name without location stays exact
        let p = chains.derive_pattern("countdown").unwrap();
        assert_eq!(p.match_type, MatchType::Exact);

        // "bp" must not fire inside other words
        let p = chains.derive_pattern("bpay transfer").unwrap();
        assert_eq!(p.match_type, MatchType::Exact);
        assert_eq!(p.pattern, "bpay transfer");

        assert!(chains.derive_pattern("   ").is_none());
    }
}
