//! Apply/learn orchestration
//!
//! A user decision locks the transaction, teaches the matching rule, and
//! pushes the same categorization onto every unlocked transaction from the
//! same merchant. All three writes commit in one SQLite transaction
//! (`Database::record_decision`).

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::db::{CategorizationUpdate, DecisionWrite};
use crate::engine::CategorizationEngine;
use crate::error::{Error, Result};
use crate::models::{Classification, Rule, Suggestion, Transaction};
use crate::rules::{normalize_merchant, MerchantPattern, RuleOutcome};

/// Per-transaction async mutexes
///
/// Serializes apply/reset on the same id while different ids run in
/// parallel. Entries are pruned once nobody holds or waits on them.
#[derive(Default)]
pub struct TransactionLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl TransactionLocks {
    pub async fn acquire(&self, transaction_id: i64) -> TransactionGuard<'_> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(transaction_id).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        TransactionGuard {
            locks: self,
            transaction_id,
            guard: Some(guard),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct TransactionGuard<'a> {
    locks: &'a TransactionLocks,
    transaction_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map's own reference left
        if map
            .get(&self.transaction_id)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            map.remove(&self.transaction_id);
        }
    }
}

/// Rule touched by a decision
#[derive(Debug, Clone, Serialize)]
pub struct RuleChange {
    pub rule: Rule,
    pub outcome: RuleOutcome,
}

/// A row a bulk operation did not write
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub transaction_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub transaction_id: i64,
    pub similar_updated: usize,
    pub propagated_ids: Vec<i64>,
    pub rule: Option<RuleChange>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkApplyResult {
    pub applied: Vec<ApplyResult>,
    pub similar_updated: usize,
    pub errors: Vec<SkippedRow>,
}

/// What propagation would touch for a transaction
#[derive(Debug, Clone, Serialize)]
pub struct SimilarTransactions {
    pub pattern: Option<MerchantPattern>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResult {
    pub transaction: Transaction,
    /// Suggestion written back when recategorizing
    pub suggestion: Option<Suggestion>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AutoCategorizeResult {
    pub examined: usize,
    pub eligible: usize,
    pub applied: usize,
    pub below_threshold: usize,
    pub failed: usize,
    pub errors: Vec<SkippedRow>,
}

impl CategorizationEngine {
    /// Commit a user decision and propagate it
    pub async fn apply(
        &self,
        transaction_id: i64,
        classification: Classification,
        category_id: Option<i64>,
        learn: bool,
    ) -> Result<ApplyResult> {
        let guard = self.locks.acquire(transaction_id).await;

        if let Some(id) = category_id {
            if self.db.get_category(id)?.is_none() {
                return Err(Error::InvalidData(format!("Unknown category {}", id)));
            }
        }

        let tx = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;

        let derived = self.chains.derive_pattern(tx.merchant());
        let merchant_key = normalize_merchant(tx.merchant());

        let outcome = self.db.record_decision(&DecisionWrite {
            transaction_id,
            classification,
            category_id,
            learn_from: (learn && !merchant_key.is_empty()).then_some(merchant_key),
            seed_pattern: if learn { derived.clone() } else { None },
            propagate: derived,
        })?;

        let result = ApplyResult {
            transaction_id,
            similar_updated: outcome.propagation.updated.len(),
            propagated_ids: outcome.propagation.updated,
            rule: outcome.rule.map(|(rule, outcome)| RuleChange { rule, outcome }),
            skipped: outcome
                .propagation
                .skipped
                .into_iter()
                .map(|(transaction_id, reason)| SkippedRow {
                    transaction_id,
                    reason,
                })
                .collect(),
        };

        info!(
            transaction_id,
            classification = %classification,
            category_id = ?category_id,
            similar_updated = result.similar_updated,
            rule_outcome = result.rule.as_ref().map(|r| r.outcome.as_str()),
            "Applied categorization"
        );

        drop(guard);
        self.maybe_retrain().await;
        Ok(result)
    }

    /// Apply the same decision to many transactions, collecting per-id errors
    pub async fn apply_bulk(
        &self,
        transaction_ids: &[i64],
        classification: Classification,
        category_id: Option<i64>,
        learn: bool,
    ) -> Result<BulkApplyResult> {
        let mut result = BulkApplyResult::default();
        for &id in transaction_ids {
            match self.apply(id, classification, category_id, learn).await {
                Ok(applied) => {
                    result.similar_updated += applied.similar_updated;
                    result.applied.push(applied);
                }
                Err(e) => {
                    warn!(transaction_id = id, error = %e, "Bulk apply row failed");
                    result.errors.push(SkippedRow {
                        transaction_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    /// Preview the unlocked transactions an apply would propagate to
    pub fn find_similar(&self, transaction_id: i64) -> Result<SimilarTransactions> {
        let tx = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;

        let pattern = self.chains.derive_pattern(tx.merchant());
        let transactions = match &pattern {
            Some(p) => self
                .db
                .find_transactions_by_pattern(p)?
                .into_iter()
                .filter(|t| t.id != transaction_id && !t.is_user_confirmed)
                .collect(),
            None => Vec::new(),
        };

        Ok(SimilarTransactions {
            pattern,
            transactions,
        })
    }

    /// Unlock a transaction, optionally re-running the suggestion chain
    pub async fn reset(&self, transaction_id: i64, recategorize: bool) -> Result<ResetResult> {
        let _guard = self.locks.acquire(transaction_id).await;

        let tx = self.db.clear_user_lock(transaction_id)?;
        info!(transaction_id, recategorize, "Reset transaction");

        if !recategorize {
            return Ok(ResetResult {
                transaction: tx,
                suggestion: None,
            });
        }

        let suggestion = self.suggester().suggest(&tx, true).await?;
        if suggestion.has_signal() {
            self.db.set_categorization(
                transaction_id,
                &CategorizationUpdate {
                    classification: suggestion.classification,
                    category_id: suggestion.category_id,
                    source: suggestion.source,
                },
            )?;
        }

        let transaction = self
            .db
            .get_transaction(transaction_id)?
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;
        Ok(ResetResult {
            transaction,
            suggestion: Some(suggestion),
        })
    }

    /// Categorize the review queue where confidence clears the threshold
    ///
    /// With `apply = false` this only counts. Writes never touch rules and
    /// leave rows unreviewed and unlocked.
    pub async fn auto_categorize(
        &self,
        account_id: Option<i64>,
        apply: bool,
    ) -> Result<AutoCategorizeResult> {
        let threshold = self.config.auto_apply_threshold;
        let queue = self.db.list_review_queue(account_id, None)?;
        let suggester = self.suggester();
        let mut result = AutoCategorizeResult::default();

        for tx in queue {
            result.examined += 1;
            let suggestion = match suggester.suggest(&tx, false).await {
                Ok(s) => s,
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(SkippedRow {
                        transaction_id: tx.id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            if !suggestion.has_signal() || suggestion.confidence <= threshold {
                result.below_threshold += 1;
                continue;
            }
            result.eligible += 1;
            if !apply {
                continue;
            }

            let _guard = self.locks.acquire(tx.id).await;
            let update = CategorizationUpdate {
                classification: suggestion.classification,
                category_id: suggestion.category_id,
                source: suggestion.source,
            };
            match self.db.set_categorization(tx.id, &update) {
                Ok(()) => {
                    debug!(transaction_id = tx.id, source = %suggestion.source, "Auto-categorized");
                    result.applied += 1;
                }
                Err(e) => {
                    warn!(transaction_id = tx.id, error = %e, "Auto-categorize row failed");
                    result.failed += 1;
                    result.errors.push(SkippedRow {
                        transaction_id: tx.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = result.examined,
            applied = result.applied,
            below_threshold = result.below_threshold,
            failed = result.failed,
            "Auto-categorize finished"
        );
        Ok(result)
    }

    /// Retrain once enough new confirmations have accumulated
    ///
    /// Never fails the caller; problems are logged.
    async fn maybe_retrain(&self) {
        let Some(after) = self.config.retrain_after else {
            return;
        };
        let confirmed = match self.db.count_user_confirmed() {
            Ok(n) => n.max(0) as usize,
            Err(e) => {
                warn!(error = %e, "Could not count confirmed transactions");
                return;
            }
        };
        if confirmed < self.config.min_training_samples {
            return;
        }
        let trained_on = self
            .classifier
            .current()
            .map(|a| a.sample_count + a.skipped)
            .unwrap_or(0)
            .max(self.retrain_mark.load(Ordering::SeqCst));
        if confirmed < trained_on + after {
            return;
        }
        self.retrain_mark.store(confirmed, Ordering::SeqCst);

        match self.train_classifier(None).await {
            Ok(report) => info!(status = ?report.status, version = ?report.version, "Automatic retrain"),
            Err(e) => warn!(error = %e, "Automatic retrain failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::Database;
    use crate::models::{CategorizationSource, MatchType, NewTransaction};
    use chrono::NaiveDate;

    struct Fixture {
        engine: CategorizationEngine,
        account: i64,
        groceries: i64,
        transport: i64,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let db = Database::in_memory().unwrap();
        db.seed_default_categories().unwrap();
        let account = db.upsert_account("Everyday").unwrap();
        let groceries = db.find_category_by_name("Groceries").unwrap().unwrap().id;
        let transport = db.find_category_by_name("Transport").unwrap().unwrap().id;
        let engine = CategorizationEngine::new(db, config, None).unwrap();
        Fixture {
            engine,
            account,
            groceries,
            transport,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::builtin().unwrap())
    }

    impl Fixture {
        fn insert(&self, merchant: &str, amount: f64) -> i64 {
            self.engine
                .db()
                .insert_transaction(&NewTransaction {
                    account_id: self.account,
                    date: NaiveDate::from_ymd_opt(2024, 8, 1).unwrap(),
                    amount,
                    merchant_code: Some(merchant.to_string()),
                    details: None,
                    type_code: None,
                })
                .unwrap()
        }

        fn get(&self, id: i64) -> Transaction {
            self.engine.db().get_transaction(id).unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_apply_locks_seeds_and_propagates() {
        let f = fixture();
        let t = f.insert("Netflix.com", -15.99);
        let u = f.insert("NETFLIX.COM", -15.99);
        let other = f.insert("spotify", -9.99);

        let result = f
            .engine
            .apply(t, Classification::Personal, Some(f.groceries), true)
            .await
            .unwrap();

        assert_eq!(result.similar_updated, 1);
        assert_eq!(result.propagated_ids, vec![u]);
        let change = result.rule.unwrap();
        assert_eq!(change.outcome, RuleOutcome::Seeded);
        assert_eq!(change.rule.confidence, crate::rules::SEED_CONFIDENCE);
        assert_eq!(change.rule.match_type, MatchType::Exact);

        let target = f.get(t);
        assert!(target.is_user_confirmed && target.is_reviewed);
        assert_eq!(target.categorization_source, CategorizationSource::User);

        let similar = f.get(u);
        assert_eq!(similar.classification, Classification::Personal);
        assert_eq!(similar.category_id, Some(f.groceries));
        assert_eq!(similar.categorization_source, CategorizationSource::Rule);
        assert!(!similar.is_user_confirmed && !similar.is_reviewed);

        assert_eq!(f.get(other).categorization_source, CategorizationSource::None);
    }

    #[tokio::test]
    async fn test_agreeing_and_overriding_decisions_move_confidence() {
        let f = fixture();
        let a = f.insert("uber trip", -20.0);
        let b = f.insert("uber trip", -22.0);
        let c = f.insert("uber trip", -25.0);

        let seeded = f
            .engine
            .apply(a, Classification::Business, Some(f.transport), true)
            .await
            .unwrap()
            .rule
            .unwrap()
            .rule;

        let agreed = f
            .engine
            .apply(b, Classification::Business, Some(f.transport), true)
            .await
            .unwrap()
            .rule
            .unwrap();
        assert_eq!(agreed.outcome, RuleOutcome::Applied);
        assert!(agreed.rule.confidence > seeded.confidence);
        assert_eq!(agreed.rule.times_applied, seeded.times_applied + 1);

        let overridden = f
            .engine
            .apply(c, Classification::Personal, Some(f.transport), true)
            .await
            .unwrap()
            .rule
            .unwrap();
        assert_eq!(overridden.outcome, RuleOutcome::Overridden);
        assert!(overridden.rule.confidence < agreed.rule.confidence);
        assert_eq!(overridden.rule.times_overridden, 1);
        assert_eq!(overridden.rule.classification, Classification::Personal);
    }

    #[tokio::test]
    async fn test_apply_never_touches_locked_rows() {
        let f = fixture();
        let t = f.insert("bunnings", -50.0);
        let locked = f.insert("bunnings", -80.0);
        f.engine
            .apply(locked, Classification::Business, None, false)
            .await
            .unwrap();

        let result = f
            .engine
            .apply(t, Classification::Personal, None, true)
            .await
            .unwrap();
        assert_eq!(result.similar_updated, 0);
        assert_eq!(f.get(locked).classification, Classification::Business);
    }

    #[tokio::test]
    async fn test_chain_store_propagates_across_branches() {
        let f = fixture();
        let t = f.insert("COUNTDOWN PONSONBY", -82.0);
        let u = f.insert("countdown  newmarket", -41.0);

        let result = f
            .engine
            .apply(t, Classification::Personal, Some(f.groceries), true)
            .await
            .unwrap();
        let change = result.rule.unwrap();
        assert_eq!(change.rule.pattern, "countdown");
        assert_eq!(change.rule.match_type, MatchType::Contains);
        assert_eq!(result.propagated_ids, vec![u]);
    }

    #[tokio::test]
    async fn test_apply_errors() {
        let f = fixture();
        let t = f.insert("acme", -5.0);

        let err = f
            .engine
            .apply(999, Classification::Personal, None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = f
            .engine
            .apply(t, Classification::Personal, Some(999), true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
        assert!(!f.get(t).is_user_confirmed);
    }

    #[tokio::test]
    async fn test_apply_bulk_collects_errors() {
        let f = fixture();
        let a = f.insert("acme", -5.0);
        let b = f.insert("widgets", -6.0);

        let result = f
            .engine
            .apply_bulk(&[a, 12345, b], Classification::Business, None, false)
            .await
            .unwrap();
        assert_eq!(result.applied.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].transaction_id, 12345);
    }

    #[tokio::test]
    async fn test_find_similar_previews_without_writing() {
        let f = fixture();
        let t = f.insert("spark nz", -80.0);
        let u = f.insert("SPARK NZ", -80.0);

        let preview = f.engine.find_similar(t).unwrap();
        assert_eq!(preview.transactions.len(), 1);
        assert_eq!(preview.transactions[0].id, u);
        assert_eq!(f.get(u).categorization_source, CategorizationSource::None);
    }

    #[tokio::test]
    async fn test_reset_recategorizes_from_rule() {
        let f = fixture();
        let t = f.insert("netflix", -15.0);
        f.engine
            .apply(t, Classification::Personal, Some(f.groceries), true)
            .await
            .unwrap();

        let result = f.engine.reset(t, true).await.unwrap();
        let suggestion = result.suggestion.unwrap();
        assert_eq!(suggestion.source, CategorizationSource::Rule);
        assert!(!result.transaction.is_user_confirmed);
        assert!(!result.transaction.is_reviewed);
        assert_eq!(result.transaction.categorization_source, CategorizationSource::Rule);
        assert_eq!(result.transaction.category_id, Some(f.groceries));
    }

    #[tokio::test]
    async fn test_reset_without_signal_keeps_values() {
        let f = fixture();
        let t = f.insert("acme", -15.0);
        f.engine
            .apply(t, Classification::Business, Some(f.transport), false)
            .await
            .unwrap();

        let result = f.engine.reset(t, true).await.unwrap();
        assert_eq!(result.suggestion.unwrap().source, CategorizationSource::None);
        assert_eq!(result.transaction.categorization_source, CategorizationSource::None);
        assert_eq!(result.transaction.classification, Classification::Business);

        let err = f.engine.reset(4242, false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_auto_categorize_respects_threshold() {
        let f = fixture();
        let db = f.engine.db();
        let low = f.insert("low merchant", -10.0);
        let high = f.insert("high merchant", -10.0);

        // Seed rules directly at known confidences
        for (name, confidence) in [("low merchant", 0.65), ("high merchant", 0.71)] {
            let rule = db
                .upsert_rule(
                    &MerchantPattern::new(name, MatchType::Exact),
                    Classification::Personal,
                    Some(f.groceries),
                    RuleOutcome::Seeded,
                )
                .unwrap();
            let conn = db.conn().unwrap();
            conn.execute(
                "UPDATE rules SET confidence = ? WHERE id = ?",
                rusqlite::params![confidence, rule.id],
            )
            .unwrap();
        }

        let dry = f.engine.auto_categorize(None, false).await.unwrap();
        assert_eq!(dry.examined, 2);
        assert_eq!(dry.eligible, 1);
        assert_eq!(dry.applied, 0);

        let result = f.engine.auto_categorize(None, true).await.unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(result.below_threshold, 1);

        assert_eq!(f.get(low).categorization_source, CategorizationSource::None);
        let applied = f.get(high);
        assert_eq!(applied.categorization_source, CategorizationSource::Rule);
        assert!(!applied.is_user_confirmed && !applied.is_reviewed);

        // Rules are untouched by auto-apply
        let rule = db.find_best_rule("high merchant").unwrap().unwrap();
        assert_eq!(rule.times_applied, 1);
    }

    #[tokio::test]
    async fn test_retrain_after_threshold() {
        let mut config = EngineConfig::builtin().unwrap();
        config.retrain_after = Some(3);
        config.min_training_samples = 3;
        let f = fixture_with(config);

        for merchant in ["acme", "widgets", "gizmo"] {
            let id = f.insert(merchant, -10.0);
            f.engine
                .apply(id, Classification::Business, Some(f.transport), false)
                .await
                .unwrap();
        }
        let stats = f.engine.classifier_stats();
        assert!(stats.trained);
        assert_eq!(stats.sample_count, 3);
    }

    #[tokio::test]
    async fn test_retrain_waits_for_minimum_samples() {
        let mut config = EngineConfig::builtin().unwrap();
        config.retrain_after = Some(1);
        config.min_training_samples = 4;
        let f = fixture_with(config);

        for merchant in ["acme", "widgets", "gizmo"] {
            let id = f.insert(merchant, -10.0);
            f.engine
                .apply(id, Classification::Business, Some(f.transport), false)
                .await
                .unwrap();
        }
        // No attempt is made below the minimum
        assert_eq!(f.engine.retrain_mark.load(Ordering::SeqCst), 0);
        assert!(!f.engine.classifier_stats().trained);

        let id = f.insert("doohickey", -10.0);
        f.engine
            .apply(id, Classification::Business, Some(f.transport), false)
            .await
            .unwrap();
        assert_eq!(f.engine.retrain_mark.load(Ordering::SeqCst), 4);
        assert_eq!(f.engine.classifier_stats().sample_count, 4);
    }

    #[tokio::test]
    async fn test_failed_retrain_is_not_repeated_every_apply() {
        let mut config = EngineConfig::builtin().unwrap();
        config.retrain_after = Some(3);
        config.min_training_samples = 2;
        let f = fixture_with(config);

        // Unset classification gives no training target, so each attempt
        // comes back insufficient
        for merchant in ["a1", "b2", "c3"] {
            let id = f.insert(merchant, -10.0);
            f.engine
                .apply(id, Classification::Unset, None, false)
                .await
                .unwrap();
        }
        assert_eq!(f.engine.retrain_mark.load(Ordering::SeqCst), 3);

        let id = f.insert("d4", -10.0);
        f.engine
            .apply(id, Classification::Unset, None, false)
            .await
            .unwrap();
        assert_eq!(f.engine.retrain_mark.load(Ordering::SeqCst), 3);
        assert!(!f.engine.classifier_stats().trained);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_applies_on_one_transaction_serialize() {
        let f = fixture();
        let t = f.insert("mitre 10", -120.0);

        let first = f.engine.clone();
        let second = f.engine.clone();
        let (a, b) = tokio::join!(
            first.apply(t, Classification::Personal, Some(f.groceries), true),
            second.apply(t, Classification::Business, Some(f.transport), true),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // One decision seeds the rule, the other sees it and overrides
        let mut outcomes = vec![a.rule.unwrap().outcome, b.rule.unwrap().outcome];
        outcomes.sort_by_key(|o| o.as_str());
        assert_eq!(outcomes, vec![RuleOutcome::Overridden, RuleOutcome::Seeded]);

        let rule = f.engine.db().find_best_rule("mitre 10").unwrap().unwrap();
        assert_eq!(rule.times_applied + rule.times_overridden, 2);
        assert_eq!(rule.times_overridden, 1);

        // The rule and the locked row agree on whichever decision landed last
        let tx = f.get(t);
        assert_eq!(tx.classification, rule.classification);
        assert_eq!(tx.category_id, rule.category_id);
    }

    #[tokio::test]
    async fn test_locks_are_pruned() {
        let locks = TransactionLocks::default();
        {
            let _a = locks.acquire(1).await;
            let _b = locks.acquire(2).await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }
}
