//! Domain models for Sift

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Personal/business split of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Personal,
    Business,
    #[default]
    Unset,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Business => "business",
            Self::Unset => "unset",
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "personal" => Ok(Self::Personal),
            "business" => Ok(Self::Business),
            "unset" | "unclassified" | "" => Ok(Self::Unset),
            _ => Err(format!("Unknown classification: {}", s)),
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a transaction's current categorization came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorizationSource {
    /// Confirmed by the user (locked)
    User,
    /// Matched a learned merchant rule
    Rule,
    /// Predicted by the trained classifier
    Ml,
    /// Returned by the external reasoning backend
    External,
    /// No categorization signal
    #[default]
    None,
}

impl CategorizationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Rule => "rule",
            Self::Ml => "ml",
            Self::External => "external",
            Self::None => "none",
        }
    }

    pub fn all() -> [CategorizationSource; 5] {
        [
            Self::User,
            Self::Rule,
            Self::Ml,
            Self::External,
            Self::None,
        ]
    }
}

impl std::str::FromStr for CategorizationSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "rule" => Ok(Self::Rule),
            "ml" => Ok(Self::Ml),
            "external" => Ok(Self::External),
            "none" => Ok(Self::None),
            _ => Err(format!("Unknown categorization source: {}", s)),
        }
    }
}

impl std::fmt::Display for CategorizationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a rule pattern is compared against a normalized merchant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Full equality after normalization
    Exact,
    /// Substring after normalization
    Contains,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            _ => Err(format!("Unknown match type: {}", s)),
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bank account transactions belong to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A spending or income category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    /// Income categories are only offered to credits by the classifier
    pub is_income: bool,
}

/// A bank transaction with its categorization state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    /// Signed amount (negative = debit)
    pub amount: f64,
    pub merchant_code: Option<String>,
    pub details: Option<String>,
    pub type_code: Option<String>,
    pub classification: Classification,
    pub category_id: Option<i64>,
    pub is_reviewed: bool,
    /// Hard lock: automation never touches a confirmed transaction
    pub is_user_confirmed: bool,
    pub categorization_source: CategorizationSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Merchant text used for matching (falls back to details)
    pub fn merchant(&self) -> &str {
        merchant_text(self.merchant_code.as_deref(), self.details.as_deref())
    }

    /// Human-readable one-line description
    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(code) = self.merchant_code.as_deref().filter(|s| !s.is_empty()) {
            parts.push(code.to_string());
        }
        if let Some(details) = self.details.as_deref().filter(|s| !s.is_empty()) {
            parts.push(details.to_string());
        }
        if let Some(kind) = self.type_code.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("({})", kind));
        }
        parts.push(format!("{:.2}", self.amount));
        parts.join(" ")
    }

    pub fn is_credit(&self) -> bool {
        self.amount > 0.0
    }
}

/// A transaction to be inserted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub account_id: i64,
    pub date: NaiveDate,
    pub amount: f64,
    pub merchant_code: Option<String>,
    pub details: Option<String>,
    pub type_code: Option<String>,
}

impl NewTransaction {
    pub fn merchant(&self) -> &str {
        merchant_text(self.merchant_code.as_deref(), self.details.as_deref())
    }
}

/// Merchant code when present, otherwise the details text
fn merchant_text<'a>(code: Option<&'a str>, details: Option<&'a str>) -> &'a str {
    code.filter(|m| !m.trim().is_empty())
        .or(details)
        .unwrap_or("")
}

/// A learned merchant rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    /// Normalized merchant pattern
    pub pattern: String,
    pub match_type: MatchType,
    pub classification: Classification,
    pub category_id: Option<i64>,
    pub confidence: f64,
    pub times_applied: i64,
    pub times_overridden: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Whether the rule targets exactly this classification/category
    pub fn agrees_with(&self, classification: Classification, category_id: Option<i64>) -> bool {
        self.classification == classification && self.category_id == category_id
    }
}

/// Aggregate rule statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleStats {
    pub total_rules: i64,
    pub high_confidence_rules: i64,
    pub total_times_applied: i64,
    pub total_times_overridden: i64,
    /// applied / (applied + overridden), 0 when no outcomes recorded
    pub accuracy_rate: f64,
}

/// A ranked categorization suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub classification: Classification,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub confidence: f64,
    pub source: CategorizationSource,
    pub explanation: String,
    /// Matched rule (rule source only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<i64>,
}

impl Suggestion {
    /// Explicit "no signal" result
    pub fn none() -> Self {
        Self {
            classification: Classification::Unset,
            category_id: None,
            category_name: None,
            confidence: 0.0,
            source: CategorizationSource::None,
            explanation: "No rule, model, or external signal for this transaction".to_string(),
            rule_id: None,
        }
    }

    pub fn has_signal(&self) -> bool {
        self.source != CategorizationSource::None
    }
}

/// Review-queue row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionWithSuggestion {
    pub transaction: Transaction,
    pub suggestion: Suggestion,
}

/// Transaction counts by categorization state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorizationStats {
    pub total: i64,
    pub user_confirmed: i64,
    pub auto_categorized: i64,
    pub uncategorized: i64,
    pub unclassified: i64,
    pub needs_review: i64,
    pub by_source: Vec<SourceCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: CategorizationSource,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_roundtrip() {
        assert_eq!(
            "Personal".parse::<Classification>().unwrap(),
            Classification::Personal
        );
        assert_eq!(
            "unclassified".parse::<Classification>().unwrap(),
            Classification::Unset
        );
        assert!("other".parse::<Classification>().is_err());
    }

    #[test]
    fn test_source_serde_lowercase() {
        let json = serde_json::to_string(&CategorizationSource::Ml).unwrap();
        assert_eq!(json, "\"ml\"");
    }

    #[test]
    fn test_transaction_merchant_falls_back_to_details() {
        let tx = Transaction {
            id: 1,
            account_id: 1,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            amount: -12.5,
            merchant_code: Some("  ".to_string()),
            details: Some("COUNTDOWN PONSONBY".to_string()),
            type_code: None,
            classification: Classification::Unset,
            category_id: None,
            is_reviewed: false,
            is_user_confirmed: false,
            categorization_source: CategorizationSource::None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(tx.merchant(), "COUNTDOWN PONSONBY");
        assert!(!tx.is_credit());
    }
}
