//! Database tests

use super::*;
use crate::models::*;
use crate::rules::{MerchantPattern, RuleOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rusqlite::params;

    fn new_tx(account_id: i64, merchant: &str, amount: f64) -> NewTransaction {
        NewTransaction {
            account_id,
            date: NaiveDate::from_ymd_opt(2024, 2, 14).unwrap(),
            amount,
            merchant_code: Some(merchant.to_string()),
            details: Some("card purchase".to_string()),
            type_code: Some("POS".to_string()),
        }
    }

    fn setup() -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        db.seed_default_categories().unwrap();
        let account = db.upsert_account("Everyday").unwrap();
        (db, account)
    }

    fn rule_update(category_id: Option<i64>) -> CategorizationUpdate {
        CategorizationUpdate {
            classification: Classification::Personal,
            category_id,
            source: CategorizationSource::Rule,
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_accounts().unwrap().is_empty());
        assert!(db.list_categories().unwrap().is_empty());
    }

    #[test]
    fn test_account_upsert() {
        let db = Database::in_memory().unwrap();
        let id = db.upsert_account("Everyday").unwrap();
        assert!(id > 0);

        // Upsert same account returns same ID
        assert_eq!(db.upsert_account("Everyday").unwrap(), id);
        assert_eq!(db.list_accounts().unwrap().len(), 1);
        assert_eq!(db.get_account(id).unwrap().unwrap().name, "Everyday");
    }

    #[test]
    fn test_seed_categories_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.seed_default_categories().unwrap();
        let first = db.list_categories().unwrap().len();
        db.seed_default_categories().unwrap();
        assert_eq!(db.list_categories().unwrap().len(), first);

        let income = db.list_categories_by_income(true).unwrap();
        assert!(income.iter().any(|c| c.name == "Salary"));
        assert!(income.iter().all(|c| c.is_income));

        // Case-insensitive lookup
        let groceries = db.find_category_by_name("  groceries ").unwrap().unwrap();
        assert_eq!(groceries.name, "Groceries");
        assert!(db.find_category_by_name("Yachts").unwrap().is_none());
    }

    #[test]
    fn test_insert_stores_normalized_merchant_key() {
        let (db, account) = setup();
        let id = db
            .insert_transaction(&new_tx(account, "  COUNTDOWN   Ponsonby ", -42.5))
            .unwrap();

        let conn = db.conn().unwrap();
        let key: String = conn
            .query_row(
                "SELECT merchant_key FROM transactions WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(key, "countdown ponsonby");

        let tx = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(tx.classification, Classification::Unset);
        assert_eq!(tx.categorization_source, CategorizationSource::None);
        assert!(!tx.is_user_confirmed);
    }

    #[test]
    fn test_find_by_pattern_exact_and_contains() {
        let (db, account) = setup();
        let a = db.insert_transaction(&new_tx(account, "BP Connect", -60.0)).unwrap();
        let b = db.insert_transaction(&new_tx(account, "bp   connect", -30.0)).unwrap();
        db.insert_transaction(&new_tx(account, "bp 2go", -12.0)).unwrap();

        let exact = db
            .find_transactions_by_pattern(&MerchantPattern::new("bp connect", MatchType::Exact))
            .unwrap();
        let mut ids: Vec<i64> = exact.iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec![a, b]);

        let contains = db
            .find_transactions_by_pattern(&MerchantPattern::new("bp", MatchType::Contains))
            .unwrap();
        assert_eq!(contains.len(), 3);
    }

    #[test]
    fn test_guarded_update_rejects_locked_rows() {
        let (db, account) = setup();
        let id = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();
        db.record_decision(&DecisionWrite {
            transaction_id: id,
            classification: Classification::Business,
            category_id: None,
            learn_from: None,
            seed_pattern: None,
            propagate: None,
        })
        .unwrap();

        let err = db.set_categorization(id, &rule_update(None)).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvariantViolation(_)));
        assert_eq!(
            db.get_transaction(id).unwrap().unwrap().classification,
            Classification::Business
        );

        let err = db.set_categorization(9999, &rule_update(None)).unwrap_err();
        assert!(matches!(err, crate::error::Error::NotFound(_)));
    }

    #[test]
    fn test_bulk_update_skips_locked_and_missing() {
        let (db, account) = setup();
        let a = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();
        let b = db.insert_transaction(&new_tx(account, "acme", -6.0)).unwrap();
        db.record_decision(&DecisionWrite {
            transaction_id: b,
            classification: Classification::Business,
            category_id: None,
            learn_from: None,
            seed_pattern: None,
            propagate: None,
        })
        .unwrap();

        let result = db.bulk_set_categorization(&[a, b, 777], &rule_update(None)).unwrap();
        assert_eq!(result.updated, vec![a]);
        assert_eq!(result.skipped.len(), 2);
        assert_eq!(
            db.get_transaction(a).unwrap().unwrap().categorization_source,
            CategorizationSource::Rule
        );
    }

    #[test]
    fn test_clear_user_lock() {
        let (db, account) = setup();
        let id = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();
        db.record_decision(&DecisionWrite {
            transaction_id: id,
            classification: Classification::Personal,
            category_id: None,
            learn_from: None,
            seed_pattern: None,
            propagate: None,
        })
        .unwrap();

        let tx = db.clear_user_lock(id).unwrap();
        assert!(!tx.is_user_confirmed);
        assert!(!tx.is_reviewed);
        assert_eq!(tx.categorization_source, CategorizationSource::None);
        assert_eq!(tx.classification, Classification::Personal);

        assert!(db.clear_user_lock(31337).is_err());
    }

    #[test]
    fn test_review_queue_excludes_locked_and_reviewed() {
        let (db, account) = setup();
        let other = db.upsert_account("Business").unwrap();
        let open = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();
        let locked = db.insert_transaction(&new_tx(account, "widgets", -6.0)).unwrap();
        db.insert_transaction(&new_tx(other, "gizmo", -7.0)).unwrap();
        db.record_decision(&DecisionWrite {
            transaction_id: locked,
            classification: Classification::Personal,
            category_id: None,
            learn_from: None,
            seed_pattern: None,
            propagate: None,
        })
        .unwrap();

        let queue = db.list_review_queue(Some(account), None).unwrap();
        assert_eq!(queue.iter().map(|t| t.id).collect::<Vec<_>>(), vec![open]);
        assert_eq!(db.list_review_queue(None, None).unwrap().len(), 2);
        assert_eq!(db.list_review_queue(None, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_rule_matching_tie_break() {
        let (db, _) = setup();
        db.upsert_rule(
            &MerchantPattern::new("countdown", MatchType::Contains),
            Classification::Personal,
            None,
            RuleOutcome::Seeded,
        )
        .unwrap();
        let exact = db
            .upsert_rule(
                &MerchantPattern::new("countdown ponsonby", MatchType::Exact),
                Classification::Business,
                None,
                RuleOutcome::Seeded,
            )
            .unwrap();

        let best = db.find_best_rule("countdown ponsonby").unwrap().unwrap();
        assert_eq!(best.id, exact.id);

        let best = db.find_best_rule("countdown newmarket").unwrap().unwrap();
        assert_eq!(best.match_type, MatchType::Contains);

        assert!(db.find_best_rule("pak n save").unwrap().is_none());
        assert!(db.find_best_rule("").unwrap().is_none());
    }

    #[test]
    fn test_upsert_rule_outcomes() {
        let (db, _) = setup();
        let pattern = MerchantPattern::new("netflix", MatchType::Exact);

        let seeded = db
            .upsert_rule(&pattern, Classification::Personal, None, RuleOutcome::Applied)
            .unwrap();
        assert_eq!(seeded.confidence, crate::rules::SEED_CONFIDENCE);
        assert_eq!(seeded.times_applied, 1);

        let applied = db
            .upsert_rule(&pattern, Classification::Personal, None, RuleOutcome::Applied)
            .unwrap();
        assert!(applied.confidence > seeded.confidence);
        assert_eq!(applied.times_applied, 2);

        let overridden = db
            .upsert_rule(&pattern, Classification::Business, None, RuleOutcome::Overridden)
            .unwrap();
        assert!(overridden.confidence < applied.confidence);
        assert_eq!(overridden.times_overridden, 1);
        assert_eq!(overridden.classification, Classification::Business);

        // Seeding an existing rule leaves its confidence alone
        let reseeded = db
            .upsert_rule(&pattern, Classification::Personal, None, RuleOutcome::Seeded)
            .unwrap();
        assert_eq!(reseeded.confidence, overridden.confidence);
        assert_eq!(reseeded.id, seeded.id);
    }

    #[test]
    fn test_confidence_replays_from_recorded_outcomes() {
        use crate::rules::{next_confidence, SEED_CONFIDENCE};

        let (db, _) = setup();
        let pattern = MerchantPattern::new("uber trip", MatchType::Exact);
        let history = [
            RuleOutcome::Applied,
            RuleOutcome::Overridden,
            RuleOutcome::Applied,
            RuleOutcome::Applied,
        ];
        db.upsert_rule(&pattern, Classification::Business, None, RuleOutcome::Seeded)
            .unwrap();
        let mut stored = None;
        for outcome in history {
            stored = Some(
                db.upsert_rule(&pattern, Classification::Business, None, outcome)
                    .unwrap(),
            );
        }
        let stored = stored.unwrap();
        assert_eq!(stored.times_applied, 4);
        assert_eq!(stored.times_overridden, 1);

        let replayed = history
            .iter()
            .fold(SEED_CONFIDENCE, |c, outcome| next_confidence(c, *outcome));
        assert!((stored.confidence - replayed).abs() < 1e-12);

        // The counters alone are not enough: order changes the result
        let reordered = [
            RuleOutcome::Overridden,
            RuleOutcome::Applied,
            RuleOutcome::Applied,
            RuleOutcome::Applied,
        ]
        .iter()
        .fold(SEED_CONFIDENCE, |c, outcome| next_confidence(c, *outcome));
        assert!((reordered - replayed).abs() > 1e-6);
    }

    #[test]
    fn test_rule_stats_and_delete() {
        let (db, account) = setup();
        assert_eq!(db.rule_stats().unwrap().accuracy_rate, 0.0);

        let pattern = MerchantPattern::new("acme", MatchType::Exact);
        let rule = db
            .upsert_rule(&pattern, Classification::Business, None, RuleOutcome::Seeded)
            .unwrap();
        db.upsert_rule(&pattern, Classification::Business, None, RuleOutcome::Applied)
            .unwrap();
        db.upsert_rule(&pattern, Classification::Personal, None, RuleOutcome::Overridden)
            .unwrap();

        let stats = db.rule_stats().unwrap();
        assert_eq!(stats.total_rules, 1);
        assert_eq!(stats.total_times_applied, 2);
        assert_eq!(stats.total_times_overridden, 1);
        assert!((stats.accuracy_rate - 2.0 / 3.0).abs() < 1e-9);

        // Deleting a rule leaves categorized transactions alone
        let id = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();
        db.set_categorization(id, &rule_update(None)).unwrap();
        db.delete_rule(rule.id).unwrap();
        let tx = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(tx.categorization_source, CategorizationSource::Rule);
        assert_eq!(tx.classification, Classification::Personal);

        assert!(matches!(
            db.delete_rule(rule.id).unwrap_err(),
            crate::error::Error::NotFound(_)
        ));
    }

    #[test]
    fn test_list_rules_min_confidence() {
        let (db, _) = setup();
        let keep = MerchantPattern::new("acme", MatchType::Exact);
        db.upsert_rule(&keep, Classification::Business, None, RuleOutcome::Seeded)
            .unwrap();
        for _ in 0..5 {
            db.upsert_rule(&keep, Classification::Business, None, RuleOutcome::Applied)
                .unwrap();
        }
        db.upsert_rule(
            &MerchantPattern::new("widgets", MatchType::Exact),
            Classification::Business,
            None,
            RuleOutcome::Seeded,
        )
        .unwrap();

        assert_eq!(db.list_rules(0.0).unwrap().len(), 2);
        let high = db.list_rules(0.8).unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].pattern, "acme");
        assert_eq!(db.rule_stats().unwrap().high_confidence_rules, 1);
    }

    #[test]
    fn test_record_decision_is_atomic_on_missing_target() {
        let (db, account) = setup();
        let id = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();

        let err = db
            .record_decision(&DecisionWrite {
                transaction_id: 5555,
                classification: Classification::Personal,
                category_id: None,
                learn_from: Some("acme".to_string()),
                seed_pattern: Some(MerchantPattern::new("acme", MatchType::Exact)),
                propagate: Some(MerchantPattern::new("acme", MatchType::Exact)),
            })
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::NotFound(_)));

        // Nothing leaked from the rolled-back transaction
        assert!(db.list_rules(0.0).unwrap().is_empty());
        assert_eq!(
            db.get_transaction(id).unwrap().unwrap().categorization_source,
            CategorizationSource::None
        );
    }

    #[test]
    fn test_categorization_stats() {
        let (db, account) = setup();
        let groceries = db.find_category_by_name("Groceries").unwrap().unwrap().id;
        let a = db.insert_transaction(&new_tx(account, "acme", -5.0)).unwrap();
        let b = db.insert_transaction(&new_tx(account, "widgets", -6.0)).unwrap();
        db.insert_transaction(&new_tx(account, "gizmo", -7.0)).unwrap();

        db.record_decision(&DecisionWrite {
            transaction_id: a,
            classification: Classification::Personal,
            category_id: Some(groceries),
            learn_from: None,
            seed_pattern: None,
            propagate: None,
        })
        .unwrap();
        db.set_categorization(b, &rule_update(Some(groceries))).unwrap();

        let stats = db.categorization_stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.user_confirmed, 1);
        assert_eq!(stats.auto_categorized, 1);
        assert_eq!(stats.uncategorized, 1);
        assert_eq!(stats.unclassified, 1);
        assert_eq!(stats.needs_review, 2);

        let count = |source| {
            stats
                .by_source
                .iter()
                .find(|s| s.source == source)
                .map(|s| s.count)
                .unwrap()
        };
        assert_eq!(count(CategorizationSource::User), 1);
        assert_eq!(count(CategorizationSource::Rule), 1);
        assert_eq!(count(CategorizationSource::None), 1);
        assert_eq!(count(CategorizationSource::Ml), 0);
    }

    #[test]
    fn test_artifact_versions_are_pruned() {
        let db = Database::in_memory().unwrap();
        let mut last = 0;
        for i in 0..7 {
            last = db
                .save_artifact(&format!("{{\"n\":{}}}", i), "sum", i, Some(0.5))
                .unwrap();
        }
        let latest = db.latest_artifact().unwrap().unwrap();
        assert_eq!(latest.version, last);
        assert_eq!(latest.sample_count, 6);

        let conn = db.conn().unwrap();
        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM classifier_artifacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 5);
    }
}
