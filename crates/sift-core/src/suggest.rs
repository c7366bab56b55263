//! Suggestion chain
//!
//! Precedence, first applicable step wins:
//! 1. user lock (confidence 1.0)
//! 2. learned rule
//! 3. trained classifier
//! 4. external backend (bounded by a timeout)
//! 5. no signal
//!
//! Steps 2-4 are an ordered list of [`Strategy`] values; each is checked for
//! capability before it runs, so a missing model or backend just falls through.

use std::time::Duration;

use tracing::{debug, warn};

use crate::ai::{AIBackend, AIClient};
use crate::classifier::Classifier;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategorizationSource, Classification, Suggestion, Transaction};
use crate::rules::normalize_merchant;

/// One source in the suggestion chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Rules,
    Classifier,
    External,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Classifier => "classifier",
            Self::External => "external",
        }
    }
}

/// Chain order after the lock check
pub const CHAIN: [Strategy; 3] = [Strategy::Rules, Strategy::Classifier, Strategy::External];

/// Borrowed view of everything the chain consults
pub struct Suggester<'a> {
    pub db: &'a Database,
    pub classifier: &'a Classifier,
    pub ai: Option<&'a AIClient>,
    pub external_timeout: Duration,
}

impl<'a> Suggester<'a> {
    /// Run the chain for one transaction
    ///
    /// `include_external` gates step 4; bulk callers leave it off.
    pub async fn suggest(&self, tx: &Transaction, include_external: bool) -> Result<Suggestion> {
        if tx.is_user_confirmed {
            debug!(transaction_id = tx.id, "Suggestion from user lock");
            return self.from_lock(tx);
        }

        for strategy in CHAIN {
            if !self.capable(strategy, include_external) {
                continue;
            }
            let hit = match strategy {
                Strategy::Rules => self.from_rule(tx)?,
                Strategy::Classifier => self.from_classifier(tx)?,
                Strategy::External => match self.from_external(tx).await {
                    Ok(hit) => hit,
                    Err(e @ Error::CapabilityUnavailable(_)) => {
                        warn!(transaction_id = tx.id, error = %e, "External classifier unavailable");
                        None
                    }
                    Err(e) => return Err(e),
                },
            };
            if let Some(suggestion) = hit {
                debug!(
                    transaction_id = tx.id,
                    strategy = strategy.as_str(),
                    confidence = suggestion.confidence,
                    "Suggestion hit"
                );
                return Ok(suggestion);
            }
        }

        Ok(Suggestion::none())
    }

    fn capable(&self, strategy: Strategy, include_external: bool) -> bool {
        match strategy {
            Strategy::Rules => true,
            Strategy::Classifier => self.classifier.current().is_some(),
            Strategy::External => include_external && self.ai.is_some(),
        }
    }

    fn category_name(&self, category_id: Option<i64>) -> Result<Option<String>> {
        match category_id {
            Some(id) => Ok(self.db.get_category(id)?.map(|c| c.name)),
            None => Ok(None),
        }
    }

    fn from_lock(&self, tx: &Transaction) -> Result<Suggestion> {
        Ok(Suggestion {
            classification: tx.classification,
            category_id: tx.category_id,
            category_name: self.category_name(tx.category_id)?,
            confidence: 1.0,
            source: CategorizationSource::User,
            explanation: "Confirmed by the user".to_string(),
            rule_id: None,
        })
    }

    fn from_rule(&self, tx: &Transaction) -> Result<Option<Suggestion>> {
        let key = normalize_merchant(tx.merchant());
        if key.is_empty() {
            return Ok(None);
        }
        let Some(rule) = self.db.find_best_rule(&key)? else {
            return Ok(None);
        };
        Ok(Some(Suggestion {
            classification: rule.classification,
            category_id: rule.category_id,
            category_name: self.category_name(rule.category_id)?,
            confidence: rule.confidence,
            source: CategorizationSource::Rule,
            explanation: format!(
                "Matched {} rule '{}' (applied {}x, overridden {}x)",
                rule.match_type, rule.pattern, rule.times_applied, rule.times_overridden
            ),
            rule_id: Some(rule.id),
        }))
    }

    fn from_classifier(&self, tx: &Transaction) -> Result<Option<Suggestion>> {
        let Some(artifact) = self.classifier.current() else {
            return Ok(None);
        };
        let Some(prediction) = artifact.predict(tx) else {
            return Ok(None);
        };
        let version = artifact.version;
        Ok(Some(Suggestion {
            classification: prediction.classification,
            category_id: prediction.category_id,
            category_name: self.category_name(prediction.category_id)?,
            confidence: prediction.confidence,
            source: CategorizationSource::Ml,
            explanation: format!("Predicted by classifier v{}", version),
            rule_id: None,
        }))
    }

    /// Ask the external backend, bounded by `external_timeout`
    ///
    /// Timeouts and backend errors come back as `CapabilityUnavailable`.
    async fn from_external(&self, tx: &Transaction) -> Result<Option<Suggestion>> {
        let Some(ai) = self.ai else {
            return Err(Error::CapabilityUnavailable(
                "no external backend configured".to_string(),
            ));
        };

        // Offer only the categories on the transaction's side of the ledger
        let categories: Vec<String> = self
            .db
            .list_categories_by_income(tx.is_credit())?
            .into_iter()
            .map(|c| c.name)
            .collect();

        let description = tx.description();
        let call = ai.classify_transaction(&description, &categories);
        let result = match tokio::time::timeout(self.external_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                return Err(Error::CapabilityUnavailable(format!(
                    "{} ({}): {}",
                    ai.model(),
                    ai.host(),
                    e
                )))
            }
            Err(_) => {
                return Err(Error::CapabilityUnavailable(format!(
                    "{} timed out after {:?}",
                    ai.host(),
                    self.external_timeout
                )))
            }
        };

        let category = self.db.find_category_by_name(&result.category)?;
        let classification = result.classification();
        if category.is_none() && classification == Classification::Unset {
            return Ok(None);
        }

        Ok(Some(Suggestion {
            classification,
            category_id: category.as_ref().map(|c| c.id),
            category_name: category.map(|c| c.name),
            confidence: result.bounded_confidence(),
            source: CategorizationSource::External,
            explanation: if result.explanation.is_empty() {
                format!("Suggested by {}", ai.model())
            } else {
                format!("Suggested by {}: {}", ai.model(), result.explanation)
            },
            rule_id: None,
        }))
    }
}
