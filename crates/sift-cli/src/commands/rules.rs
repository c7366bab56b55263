//! Learned rule command implementations

use anyhow::Result;
use sift_core::CategorizationEngine;

use super::{percent, truncate};

pub fn cmd_rules_list(engine: &CategorizationEngine, min_confidence: f64) -> Result<()> {
    let rules = engine.rule_list(min_confidence)?;

    if rules.is_empty() {
        println!("No rules learned yet. Confirm a transaction with:");
        println!("  sift apply <id> -c personal -g <category>");
        return Ok(());
    }

    println!();
    println!("📋 Learned Rules");
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   {:>4} │ {:>5} │ {:8} │ {:8} │ {:>6} │ {}",
        "ID", "Conf", "Type", "Class", "±", "Pattern"
    );
    println!("   ─────┼───────┼──────────┼──────────┼────────┼─────────────────");

    for rule in rules {
        println!(
            "   {:>4} │ {:>5} │ {:8} │ {:8} │ {:>2}/{:<3} │ {}",
            rule.id,
            percent(rule.confidence),
            rule.match_type.as_str(),
            rule.classification.as_str(),
            rule.times_applied,
            rule.times_overridden,
            truncate(&rule.pattern, 30)
        );
    }

    Ok(())
}

pub fn cmd_rules_delete(engine: &CategorizationEngine, id: i64) -> Result<()> {
    let rule = engine
        .db()
        .get_rule(id)?
        .ok_or_else(|| anyhow::anyhow!("Rule {} not found", id))?;
    engine.rule_delete(id)?;

    println!("🗑  Deleted rule {} ('{}')", id, rule.pattern);
    println!("   Transactions it already categorized are unchanged.");

    Ok(())
}

pub fn cmd_rules_stats(engine: &CategorizationEngine) -> Result<()> {
    let stats = engine.rule_stats()?;

    println!();
    println!("📈 Rule Statistics");
    println!("   ─────────────────────────────");
    println!("   Rules:           {}", stats.total_rules);
    println!("   High confidence: {}", stats.high_confidence_rules);
    println!("   Times applied:   {}", stats.total_times_applied);
    println!("   Times corrected: {}", stats.total_times_overridden);
    println!("   Accuracy:        {}", percent(stats.accuracy_rate));

    Ok(())
}
