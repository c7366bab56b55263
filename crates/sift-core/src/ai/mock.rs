//! Mock backend for testing
//!
//! Keyword-based answers, no network. Useful for unit tests and for running
//! the server without an Ollama instance (`AI_BACKEND=mock`).

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::ExternalClassification;
use super::AIBackend;

/// (keyword, classification, category)
const KEYWORDS: &[(&str, &str, &str)] = &[
    ("COUNTDOWN", "personal", "Groceries"),
    ("NEW WORLD", "personal", "Groceries"),
    ("PAK N SAVE", "personal", "Groceries"),
    ("UBER", "business", "Transport"),
    ("BP", "personal", "Transport"),
    ("Z ENERGY", "personal", "Transport"),
    ("NETFLIX", "personal", "Entertainment"),
    ("SPOTIFY", "personal", "Entertainment"),
    ("BUNNINGS", "personal", "Home & Garden"),
    ("SPARK", "business", "Utilities"),
    ("MERCURY", "personal", "Utilities"),
    ("SALARY", "personal", "Salary"),
];

/// Mock AI backend for testing
#[derive(Clone, Default)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
}

impl MockBackend {
    /// Create a new mock backend (healthy by default)
    pub fn new() -> Self {
        Self { healthy: true }
    }

    /// Create an unhealthy mock backend; every classification fails
    pub fn unhealthy() -> Self {
        Self { healthy: false }
    }
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn classify_transaction(
        &self,
        description: &str,
        categories: &[String],
    ) -> Result<ExternalClassification> {
        if !self.healthy {
            return Err(Error::CapabilityUnavailable(
                "mock backend is unhealthy".to_string(),
            ));
        }

        // Whole-word match on padded, whitespace-collapsed text
        let padded = format!(
            " {} ",
            description.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ")
        );
        let offered = |category: &str| {
            categories.is_empty() || categories.iter().any(|c| c.eq_ignore_ascii_case(category))
        };
        let hit = KEYWORDS.iter().find(|(keyword, _, category)| {
            padded.contains(&format!(" {} ", keyword)) && offered(category)
        });

        Ok(match hit {
            Some((keyword, classification, category)) => ExternalClassification {
                classification: Some(classification.to_string()),
                category: category.to_string(),
                confidence: 0.75,
                explanation: format!("Matched keyword {}", keyword),
            },
            None => ExternalClassification {
                classification: None,
                category: "Other".to_string(),
                confidence: 0.3,
                explanation: "No keyword matched".to_string(),
            },
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;

    #[tokio::test]
    async fn test_keyword_classification() {
        let mock = MockBackend::new();
        let result = mock
            .classify_transaction("UBER TRIP -18.20", &["Transport".to_string()])
            .await
            .unwrap();
        assert_eq!(result.category, "Transport");
        assert_eq!(result.classification(), Classification::Business);

        let result = mock.classify_transaction("ACME LTD", &[]).await.unwrap();
        assert_eq!(result.category, "Other");
        assert_eq!(result.classification(), Classification::Unset);
    }

    #[tokio::test]
    async fn test_unhealthy_mock_fails() {
        let mock = MockBackend::unhealthy();
        assert!(!mock.health_check().await);
        assert!(mock.classify_transaction("UBER", &[]).await.is_err());
    }
}
