//! Categorization engine facade
//!
//! Ties the store, rules, classifier, and external backend together behind
//! one cloneable handle that the CLI and the server share. Apply/reset/auto
//! live in `apply.rs`; this file holds construction, suggestions, training,
//! and read-only queries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::ai::AIClient;
use crate::apply::TransactionLocks;
use crate::classifier::{Classifier, ClassifierStats, Prediction, TrainReport};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategorizationStats, Rule, RuleStats, Suggestion, TransactionWithSuggestion};
use crate::rules::ChainStores;
use crate::suggest::Suggester;

/// Shared handle to the categorization engine
#[derive(Clone)]
pub struct CategorizationEngine {
    pub(crate) db: Database,
    pub(crate) classifier: Arc<Classifier>,
    pub(crate) ai: Option<AIClient>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) chains: Arc<ChainStores>,
    pub(crate) locks: Arc<TransactionLocks>,
    /// Confirmed-row count at the last automatic retrain attempt
    pub(crate) retrain_mark: Arc<AtomicUsize>,
}

/// Flags a blocking training run as abandoned when its caller goes away
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CategorizationEngine {
    pub fn new(db: Database, config: EngineConfig, ai: Option<AIClient>) -> Result<Self> {
        let chains = config.chain_stores()?;
        Ok(Self {
            db,
            classifier: Arc::new(Classifier::new()),
            ai,
            config: Arc::new(config),
            chains: Arc::new(chains),
            locks: Arc::new(TransactionLocks::default()),
            retrain_mark: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ai(&self) -> Option<&AIClient> {
        self.ai.as_ref()
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Restore the newest persisted classifier artifact
    pub fn load_classifier(&self) -> Result<Option<i64>> {
        self.classifier.load_latest(&self.db)
    }

    pub(crate) fn suggester(&self) -> Suggester<'_> {
        Suggester {
            db: &self.db,
            classifier: &self.classifier,
            ai: self.ai.as_ref(),
            external_timeout: self.config.external_timeout,
        }
    }

    /// Review queue with a suggestion per row
    pub async fn suggestions(
        &self,
        account_id: Option<i64>,
        limit: i64,
        include_external: bool,
    ) -> Result<Vec<TransactionWithSuggestion>> {
        let queue = self.db.list_review_queue(account_id, Some(limit))?;
        let suggester = self.suggester();
        let mut out = Vec::with_capacity(queue.len());
        for transaction in queue {
            let suggestion = suggester.suggest(&transaction, include_external).await?;
            out.push(TransactionWithSuggestion {
                transaction,
                suggestion,
            });
        }
        Ok(out)
    }

    /// Suggestion for a single transaction
    pub async fn suggest_one(&self, transaction_id: i64, include_external: bool) -> Result<Suggestion> {
        let tx = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;
        self.suggester().suggest(&tx, include_external).await
    }

    /// Train on a blocking thread and swap in the result
    ///
    /// `min_samples = None` uses the configured minimum. Dropping this future
    /// before the new artifact is persisted abandons the run and the current
    /// model keeps serving.
    pub async fn train_classifier(&self, min_samples: Option<usize>) -> Result<TrainReport> {
        let min_samples = min_samples.unwrap_or(self.config.min_training_samples);
        let db = self.db.clone();
        let classifier = self.classifier.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel = CancelOnDrop(cancelled.clone());
        tokio::task::spawn_blocking(move || {
            classifier.train_cancellable(&db, min_samples, &cancelled)
        })
            .await
            .map_err(|e| Error::Background(e.to_string()))?
    }

    pub fn classifier_stats(&self) -> ClassifierStats {
        self.classifier.stats()
    }

    /// Raw classifier prediction for one transaction
    pub fn predict(&self, transaction_id: i64) -> Result<Option<Prediction>> {
        let tx = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;
        Ok(self.classifier.predict(&tx))
    }

    pub fn rule_list(&self, min_confidence: f64) -> Result<Vec<Rule>> {
        self.db.list_rules(min_confidence)
    }

    /// Delete a rule; transactions it already categorized keep their values
    pub fn rule_delete(&self, rule_id: i64) -> Result<()> {
        self.db.delete_rule(rule_id)?;
        info!(rule_id, "Deleted rule");
        Ok(())
    }

    pub fn rule_stats(&self) -> Result<RuleStats> {
        self.db.rule_stats()
    }

    pub fn stats(&self) -> Result<CategorizationStats> {
        self.db.categorization_stats()
    }
}
