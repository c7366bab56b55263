//! Transaction store
//!
//! Automated writes always go through a guarded update
//! (`... AND is_user_confirmed = 0`), so a locked row is never altered by
//! propagation, reset-recategorize, or auto-categorization.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, warn};

use super::rules::{best_rule, record_outcome_in, seed_rule_in};
use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{
    CategorizationSource, CategorizationStats, Classification, NewTransaction, Rule, SourceCount,
    Transaction,
};
use crate::rules::{normalize_merchant, MerchantPattern, RuleOutcome};

const TRANSACTION_COLUMNS: &str = "id, account_id, date, amount, merchant_code, details, \
     type_code, classification, category_id, is_reviewed, is_user_confirmed, \
     categorization_source, created_at, updated_at";

/// Fields written by an automated (non-user) categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategorizationUpdate {
    pub classification: Classification,
    pub category_id: Option<i64>,
    pub source: CategorizationSource,
}

/// A user decision to commit atomically
#[derive(Debug, Clone)]
pub struct DecisionWrite {
    pub transaction_id: i64,
    pub classification: Classification,
    pub category_id: Option<i64>,
    /// Merchant key used to find the prior rule (None = don't learn)
    pub learn_from: Option<String>,
    /// Pattern to seed when no prior rule matched
    pub seed_pattern: Option<MerchantPattern>,
    /// Pattern whose unlocked matches receive the decision
    pub propagate: Option<MerchantPattern>,
}

/// Outcome of a guarded bulk write
#[derive(Debug, Clone, Default, Serialize)]
pub struct PropagationWrite {
    pub updated: Vec<i64>,
    /// Rows rejected by the lock guard, with the reason
    pub skipped: Vec<(i64, String)>,
}

/// Everything a committed decision changed
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub rule: Option<(Rule, RuleOutcome)>,
    pub propagation: PropagationWrite,
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
    let date_str: String = row.get(2)?;
    let classification_str: String = row.get(7)?;
    let source_str: String = row.get(11)?;
    let created_at_str: String = row.get(12)?;
    let updated_at_str: String = row.get(13)?;
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        date: chrono::NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").unwrap_or_default(),
        amount: row.get(3)?,
        merchant_code: row.get(4)?,
        details: row.get(5)?,
        type_code: row.get(6)?,
        classification: classification_str.parse().unwrap_or_default(),
        category_id: row.get(8)?,
        is_reviewed: row.get(9)?,
        is_user_confirmed: row.get(10)?,
        categorization_source: source_str.parse().unwrap_or_default(),
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

fn get_transaction_in(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let tx = conn
        .query_row(
            &format!(
                "SELECT {} FROM transactions WHERE id = ?",
                TRANSACTION_COLUMNS
            ),
            params![id],
            row_to_transaction,
        )
        .optional()?;
    Ok(tx)
}

/// Transactions whose merchant matches `pattern`
///
/// SQL narrows by the stored `merchant_key`; the shared matcher decides.
fn find_by_pattern_in(conn: &Connection, pattern: &MerchantPattern) -> Result<Vec<Transaction>> {
    if pattern.pattern.is_empty() {
        return Ok(Vec::new());
    }
    let filter = match pattern.match_type {
        crate::models::MatchType::Exact => "merchant_key = ?",
        crate::models::MatchType::Contains => "instr(merchant_key, ?) > 0",
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, merchant_key FROM transactions WHERE {} ORDER BY date DESC, id DESC",
        TRANSACTION_COLUMNS, filter
    ))?;
    let rows = stmt
        .query_map(params![pattern.pattern], |row| {
            let key: String = row.get(14)?;
            Ok((row_to_transaction(row)?, key))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|(_, key)| pattern.matches(key))
        .map(|(tx, _)| tx)
        .collect())
}

/// Guarded automated write; errors if the row is locked or missing
fn set_categorization_in(
    conn: &Connection,
    id: i64,
    update: &CategorizationUpdate,
    reviewed: bool,
) -> Result<()> {
    let changed = conn.execute(
        r#"
        UPDATE transactions
        SET classification = ?, category_id = ?, categorization_source = ?,
            is_reviewed = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ? AND is_user_confirmed = 0
        "#,
        params![
            update.classification.as_str(),
            update.category_id,
            update.source.as_str(),
            reviewed,
            id
        ],
    )?;

    if changed == 0 {
        let locked: Option<bool> = conn
            .query_row(
                "SELECT is_user_confirmed FROM transactions WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        return Err(match locked {
            Some(_) => Error::InvariantViolation(format!(
                "Transaction {} is user-confirmed and cannot be auto-categorized",
                id
            )),
            None => Error::NotFound(format!("Transaction {}", id)),
        });
    }
    Ok(())
}

/// Apply `update` to each id inside `tx`, one savepoint per row
fn propagate_in(
    tx: &mut rusqlite::Transaction,
    ids: &[i64],
    update: &CategorizationUpdate,
) -> Result<PropagationWrite> {
    let mut result = PropagationWrite::default();
    for &id in ids {
        let sp = tx.savepoint()?;
        match set_categorization_in(&sp, id, update, false) {
            Ok(()) => {
                sp.commit()?;
                debug!(transaction_id = id, "Propagated categorization");
                result.updated.push(id);
            }
            Err(e @ (Error::InvariantViolation(_) | Error::NotFound(_))) => {
                // Savepoint rolls back on drop
                warn!(transaction_id = id, error = %e, "Skipped propagation row");
                result.skipped.push((id, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(result)
}

impl Database {
    /// Insert a transaction, returning its ID
    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO transactions (account_id, date, amount, merchant_code, details, type_code, merchant_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                tx.account_id,
                tx.date.to_string(),
                tx.amount,
                tx.merchant_code,
                tx.details,
                tx.type_code,
                normalize_merchant(tx.merchant()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a single transaction by ID
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        get_transaction_in(&conn, id)
    }

    /// List transactions, newest first
    pub fn list_transactions(&self, account_id: Option<i64>, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE (?1 IS NULL OR account_id = ?1)
            ORDER BY date DESC, id DESC
            LIMIT ?2
            "#,
            TRANSACTION_COLUMNS
        ))?;
        let txs = stmt
            .query_map(params![account_id, limit], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    /// Unreviewed, unlocked transactions (the manual review queue)
    ///
    /// `limit = None` returns the whole queue.
    pub fn list_review_queue(
        &self,
        account_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE is_user_confirmed = 0 AND is_reviewed = 0
              AND (?1 IS NULL OR account_id = ?1)
            ORDER BY date DESC, id DESC
            LIMIT ?2
            "#,
            TRANSACTION_COLUMNS
        ))?;
        let txs = stmt
            .query_map(params![account_id, limit.unwrap_or(-1)], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    /// Transactions matching a merchant pattern
    pub fn find_transactions_by_pattern(
        &self,
        pattern: &MerchantPattern,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        find_by_pattern_in(&conn, pattern)
    }

    /// User-confirmed transactions (classifier ground truth), oldest first
    pub fn list_user_confirmed(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE categorization_source = 'user' ORDER BY id",
            TRANSACTION_COLUMNS
        ))?;
        let txs = stmt
            .query_map([], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(txs)
    }

    /// Count transactions with user ground truth
    pub fn count_user_confirmed(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE categorization_source = 'user'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Guarded automated categorization of one transaction
    ///
    /// Returns `InvariantViolation` if the row is user-confirmed.
    pub fn set_categorization(&self, id: i64, update: &CategorizationUpdate) -> Result<()> {
        let conn = self.conn()?;
        set_categorization_in(&conn, id, update, false)
    }

    /// Guarded automated categorization of many transactions in one transaction
    ///
    /// Locked or missing rows are skipped and reported; the rest commit together.
    pub fn bulk_set_categorization(
        &self,
        ids: &[i64],
        update: &CategorizationUpdate,
    ) -> Result<PropagationWrite> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = propagate_in(&mut tx, ids, update)?;
        tx.commit()?;
        Ok(result)
    }

    /// Clear the user lock and review flag; source becomes `none`
    pub fn clear_user_lock(&self, id: i64) -> Result<Transaction> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE transactions
            SET is_user_confirmed = 0, is_reviewed = 0, categorization_source = 'none',
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("Transaction {}", id)));
        }
        get_transaction_in(&conn, id)?.ok_or_else(|| Error::NotFound(format!("Transaction {}", id)))
    }

    /// Commit a user decision atomically
    ///
    /// In one write transaction: lock the target with the user's choice, record
    /// the rule outcome, and propagate to unlocked matches of `propagate`.
    pub fn record_decision(&self, write: &DecisionWrite) -> Result<DecisionOutcome> {
        let mut conn = self.conn()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            r#"
            UPDATE transactions
            SET classification = ?, category_id = ?, categorization_source = 'user',
                is_reviewed = 1, is_user_confirmed = 1, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![
                write.classification.as_str(),
                write.category_id,
                write.transaction_id
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!(
                "Transaction {}",
                write.transaction_id
            )));
        }

        let rule = match &write.learn_from {
            Some(merchant_key) => match best_rule(&tx, merchant_key)? {
                Some(prior) => {
                    let outcome = if prior.agrees_with(write.classification, write.category_id) {
                        RuleOutcome::Applied
                    } else {
                        RuleOutcome::Overridden
                    };
                    let updated = record_outcome_in(
                        &tx,
                        &prior,
                        write.classification,
                        write.category_id,
                        outcome,
                    )?;
                    Some((updated, outcome))
                }
                None => match &write.seed_pattern {
                    Some(pattern) => Some((
                        seed_rule_in(&tx, pattern, write.classification, write.category_id)?,
                        RuleOutcome::Seeded,
                    )),
                    None => None,
                },
            },
            None => None,
        };

        let propagation = match &write.propagate {
            Some(pattern) => {
                let ids: Vec<i64> = find_by_pattern_in(&tx, pattern)?
                    .into_iter()
                    .filter(|t| {
                        t.id != write.transaction_id
                            && !t.is_user_confirmed
                            && !(t.classification == write.classification
                                && t.category_id == write.category_id)
                    })
                    .map(|t| t.id)
                    .collect();
                let update = CategorizationUpdate {
                    classification: write.classification,
                    category_id: write.category_id,
                    source: CategorizationSource::Rule,
                };
                propagate_in(&mut tx, &ids, &update)?
            }
            None => PropagationWrite::default(),
        };

        tx.commit()?;
        Ok(DecisionOutcome { rule, propagation })
    }

    /// Counts by categorization state
    pub fn categorization_stats(&self) -> Result<CategorizationStats> {
        let conn = self.conn()?;
        let mut stats = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(is_user_confirmed), 0),
                   COALESCE(SUM(CASE WHEN is_user_confirmed = 0
                        AND categorization_source IN ('rule', 'ml', 'external') THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN category_id IS NULL THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN classification = 'unset' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN is_user_confirmed = 0 AND is_reviewed = 0 THEN 1 ELSE 0 END), 0)
            FROM transactions
            "#,
            [],
            |row| {
                Ok(CategorizationStats {
                    total: row.get(0)?,
                    user_confirmed: row.get(1)?,
                    auto_categorized: row.get(2)?,
                    uncategorized: row.get(3)?,
                    unclassified: row.get(4)?,
                    needs_review: row.get(5)?,
                    by_source: Vec::new(),
                })
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT categorization_source, COUNT(*) FROM transactions GROUP BY categorization_source",
        )?;
        let counts = stmt
            .query_map([], |row| {
                let source: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((source, count))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        stats.by_source = CategorizationSource::all()
            .into_iter()
            .map(|source| SourceCount {
                source,
                count: counts
                    .iter()
                    .filter(|(s, _)| s.parse::<CategorizationSource>().ok() == Some(source))
                    .map(|(_, c)| *c)
                    .sum(),
            })
            .collect();

        Ok(stats)
    }
}
