//! Learned merchant rule storage
//!
//! Confidence only changes through [`next_confidence`]; nothing here writes an
//! arbitrary confidence value.

use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Classification, MatchType, Rule, RuleStats};
use crate::rules::{
    next_confidence, select_best_rule, MerchantPattern, RuleOutcome, HIGH_CONFIDENCE,
    SEED_CONFIDENCE,
};

const RULE_COLUMNS: &str = "id, pattern, match_type, classification, category_id, confidence, \
     times_applied, times_overridden, created_at, updated_at";

/// Rules whose pattern could match the given normalized merchant
pub(crate) fn candidate_rules(conn: &Connection, merchant_key: &str) -> Result<Vec<Rule>> {
    if merchant_key.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {}
        FROM rules
        WHERE (match_type = 'exact' AND pattern = ?1)
           OR (match_type = 'contains' AND pattern != '' AND instr(?1, pattern) > 0)
        "#,
        RULE_COLUMNS
    ))?;
    let rules = stmt
        .query_map(params![merchant_key], row_to_rule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Best matching rule for a normalized merchant, read through `conn`
pub(crate) fn best_rule(conn: &Connection, merchant_key: &str) -> Result<Option<Rule>> {
    let candidates = candidate_rules(conn, merchant_key)?;
    Ok(select_best_rule(&candidates, merchant_key).cloned())
}

pub(crate) fn get_rule_in(conn: &Connection, id: i64) -> Result<Option<Rule>> {
    let rule = conn
        .query_row(
            &format!("SELECT {} FROM rules WHERE id = ?", RULE_COLUMNS),
            params![id],
            row_to_rule,
        )
        .optional()?;
    Ok(rule)
}

fn find_rule_in(conn: &Connection, pattern: &MerchantPattern) -> Result<Option<Rule>> {
    let rule = conn
        .query_row(
            &format!(
                "SELECT {} FROM rules WHERE pattern = ? AND match_type = ?",
                RULE_COLUMNS
            ),
            params![pattern.pattern, pattern.match_type.as_str()],
            row_to_rule,
        )
        .optional()?;
    Ok(rule)
}

/// Record an applied/overridden outcome on an existing rule
///
/// An override also retargets the rule at the user's choice.
pub(crate) fn record_outcome_in(
    conn: &Connection,
    rule: &Rule,
    classification: Classification,
    category_id: Option<i64>,
    outcome: RuleOutcome,
) -> Result<Rule> {
    let confidence = next_confidence(rule.confidence, outcome);
    match outcome {
        RuleOutcome::Applied => {
            conn.execute(
                r#"
                UPDATE rules
                SET confidence = ?, times_applied = times_applied + 1,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
                params![confidence, rule.id],
            )?;
        }
        RuleOutcome::Overridden => {
            conn.execute(
                r#"
                UPDATE rules
                SET confidence = ?, times_overridden = times_overridden + 1,
                    classification = ?, category_id = ?,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = ?
                "#,
                params![
                    confidence,
                    classification.as_str(),
                    category_id,
                    rule.id
                ],
            )?;
        }
        RuleOutcome::Seeded => {
            conn.execute(
                "UPDATE rules SET updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                params![rule.id],
            )?;
        }
    }

    get_rule_in(conn, rule.id)?.ok_or_else(|| Error::NotFound(format!("Rule {}", rule.id)))
}

/// Create a rule with the seed confidence (no-op on an existing pattern)
pub(crate) fn seed_rule_in(
    conn: &Connection,
    pattern: &MerchantPattern,
    classification: Classification,
    category_id: Option<i64>,
) -> Result<Rule> {
    conn.execute(
        r#"
        INSERT INTO rules (pattern, match_type, classification, category_id, confidence, times_applied)
        VALUES (?, ?, ?, ?, ?, 1)
        ON CONFLICT(pattern, match_type) DO UPDATE SET updated_at = CURRENT_TIMESTAMP
        "#,
        params![
            pattern.pattern,
            pattern.match_type.as_str(),
            classification.as_str(),
            category_id,
            SEED_CONFIDENCE
        ],
    )?;

    find_rule_in(conn, pattern)?
        .ok_or_else(|| Error::NotFound(format!("Rule for pattern '{}'", pattern.pattern)))
}

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<Rule> {
    let match_type_str: String = row.get(2)?;
    let classification_str: String = row.get(3)?;
    let created_at_str: String = row.get(8)?;
    let updated_at_str: String = row.get(9)?;
    Ok(Rule {
        id: row.get(0)?,
        pattern: row.get(1)?,
        match_type: match_type_str.parse().unwrap_or(MatchType::Exact),
        classification: classification_str.parse().unwrap_or_default(),
        category_id: row.get(4)?,
        confidence: row.get(5)?,
        times_applied: row.get(6)?,
        times_overridden: row.get(7)?,
        created_at: parse_datetime(&created_at_str),
        updated_at: parse_datetime(&updated_at_str),
    })
}

impl Database {
    /// Find the best rule for a normalized merchant key
    pub fn find_best_rule(&self, merchant_key: &str) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        best_rule(&conn, merchant_key)
    }

    /// Create or update the rule for a pattern with an outcome
    ///
    /// A missing rule is seeded regardless of `outcome`.
    pub fn upsert_rule(
        &self,
        pattern: &MerchantPattern,
        classification: Classification,
        category_id: Option<i64>,
        outcome: RuleOutcome,
    ) -> Result<Rule> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let rule = match find_rule_in(&tx, pattern)? {
            Some(existing) => {
                record_outcome_in(&tx, &existing, classification, category_id, outcome)?
            }
            None => seed_rule_in(&tx, pattern, classification, category_id)?,
        };
        tx.commit()?;
        Ok(rule)
    }

    /// Get a rule by ID
    pub fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        get_rule_in(&conn, id)
    }

    /// List rules at or above a confidence threshold
    pub fn list_rules(&self, min_confidence: f64) -> Result<Vec<Rule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rules WHERE confidence >= ? ORDER BY confidence DESC, pattern",
            RULE_COLUMNS
        ))?;
        let rules = stmt
            .query_map(params![min_confidence], row_to_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Delete a rule
    ///
    /// Transactions already categorized through the rule keep their state.
    pub fn delete_rule(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM rules WHERE id = ?", params![id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    /// Aggregate statistics over all rules
    pub fn rule_stats(&self) -> Result<RuleStats> {
        let conn = self.conn()?;
        let (total_rules, high_confidence_rules, applied, overridden): (i64, i64, i64, i64) = conn
            .query_row(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN confidence >= ? THEN 1 ELSE 0 END), 0),
                       COALESCE(SUM(times_applied), 0),
                       COALESCE(SUM(times_overridden), 0)
                FROM rules
                "#,
                params![HIGH_CONFIDENCE],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let outcomes = applied + overridden;
        let accuracy_rate = if outcomes > 0 {
            applied as f64 / outcomes as f64
        } else {
            0.0
        };

        Ok(RuleStats {
            total_rules,
            high_confidence_rules,
            total_times_applied: applied,
            total_times_overridden: overridden,
            accuracy_rate,
        })
    }
}
