//! Categorization command implementations
//!
//! Review queue, apply/learn, similar, reset, auto-categorize, stats.

use anyhow::{Context, Result};
use sift_core::models::{Classification, Suggestion};
use sift_core::{CategorizationEngine, RuleOutcome};

use super::{format_amount, percent, resolve_account, resolve_category, truncate};

fn describe_suggestion(s: &Suggestion) -> String {
    if !s.has_signal() {
        return "(no suggestion)".to_string();
    }
    format!(
        "{} / {} ({} via {})",
        s.classification,
        s.category_name.as_deref().unwrap_or("no category"),
        percent(s.confidence),
        s.source
    )
}

pub async fn cmd_suggest_queue(
    engine: &CategorizationEngine,
    account: Option<&str>,
    limit: i64,
) -> Result<()> {
    let account_id = account
        .map(|a| resolve_account(engine.db(), a))
        .transpose()?;
    let rows = engine.suggestions(account_id, limit, false).await?;

    if rows.is_empty() {
        println!("✅ Review queue is empty.");
        return Ok(());
    }

    println!();
    println!("🧾 Review Queue ({} shown)", rows.len());
    println!("   ─────────────────────────────────────────────────────────────");

    for row in rows {
        let tx = &row.transaction;
        println!(
            "   [{:>5}] {} │ {:>10} │ {:30} │ {}",
            tx.id,
            tx.date,
            format_amount(tx.amount),
            truncate(&tx.description(), 30),
            describe_suggestion(&row.suggestion)
        );
    }

    println!();
    println!("   Confirm with: sift apply <id> -c personal|business -g <category>");

    Ok(())
}

pub async fn cmd_suggest_one(
    engine: &CategorizationEngine,
    id: i64,
    external: bool,
) -> Result<Suggestion> {
    let suggestion = engine.suggest_one(id, external).await?;

    println!();
    println!("💡 Suggestion for transaction {}", id);
    println!("   {}", describe_suggestion(&suggestion));
    if !suggestion.explanation.is_empty() {
        println!("   {}", suggestion.explanation);
    }
    if !suggestion.has_signal() && !external && engine.ai().is_some() {
        println!("   💡 Tip: add --external to ask the external classifier");
    }

    Ok(suggestion)
}

pub async fn cmd_apply(
    engine: &CategorizationEngine,
    ids: &[i64],
    classification: &str,
    category: Option<&str>,
    learn: bool,
) -> Result<()> {
    let classification: Classification = classification
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{} (valid: personal, business)", e))?;
    let category_id = category
        .map(|c| resolve_category(engine.db(), c))
        .transpose()?;

    if let [id] = ids {
        let result = engine
            .apply(*id, classification, category_id, learn)
            .await
            .with_context(|| format!("Failed to apply to transaction {}", id))?;

        println!("✅ Transaction {} confirmed as {}", id, classification);
        if let Some(change) = &result.rule {
            let verb = match change.outcome {
                RuleOutcome::Seeded => "Learned new",
                RuleOutcome::Applied => "Reinforced",
                RuleOutcome::Overridden => "Corrected",
            };
            println!(
                "   {} {} rule '{}' (confidence {})",
                verb,
                change.rule.match_type,
                change.rule.pattern,
                percent(change.rule.confidence)
            );
        }
        if result.similar_updated > 0 {
            println!(
                "   Updated {} similar transaction(s)",
                result.similar_updated
            );
        }
        for skipped in &result.skipped {
            println!(
                "   ⚠️  Skipped {}: {}",
                skipped.transaction_id, skipped.reason
            );
        }
        return Ok(());
    }

    let result = engine
        .apply_bulk(ids, classification, category_id, learn)
        .await?;
    println!(
        "✅ Applied to {} of {} transaction(s); {} similar updated",
        result.applied.len(),
        ids.len(),
        result.similar_updated
    );
    for err in &result.errors {
        println!("   ❌ {}: {}", err.transaction_id, err.reason);
    }

    Ok(())
}

pub fn cmd_similar(engine: &CategorizationEngine, id: i64) -> Result<()> {
    let similar = engine.find_similar(id)?;

    let Some(pattern) = &similar.pattern else {
        println!("Transaction {} has no merchant text to match on.", id);
        return Ok(());
    };

    println!();
    println!(
        "🔗 {} unlocked transaction(s) match {} '{}'",
        similar.transactions.len(),
        pattern.match_type,
        pattern.pattern
    );
    for tx in &similar.transactions {
        println!(
            "   [{:>5}] {} │ {:>10} │ {}",
            tx.id,
            tx.date,
            format_amount(tx.amount),
            truncate(&tx.description(), 40)
        );
    }

    Ok(())
}

pub async fn cmd_reset(engine: &CategorizationEngine, id: i64, recategorize: bool) -> Result<()> {
    let result = engine.reset(id, recategorize).await?;

    println!("🔓 Transaction {} unlocked", id);
    match &result.suggestion {
        Some(s) if s.has_signal() => println!("   Now: {}", describe_suggestion(s)),
        Some(_) => println!("   No suggestion available; left uncategorized"),
        None => {}
    }

    Ok(())
}

pub async fn cmd_auto(
    engine: &CategorizationEngine,
    account: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let account_id = account
        .map(|a| resolve_account(engine.db(), a))
        .transpose()?;
    let threshold = engine.config().auto_apply_threshold;
    let result = engine.auto_categorize(account_id, !dry_run).await?;

    println!();
    if dry_run {
        println!("🔍 Auto-categorize (dry run, threshold {})", percent(threshold));
    } else {
        println!("⚡ Auto-categorize (threshold {})", percent(threshold));
    }
    println!("   ─────────────────────────────");
    println!("   Examined:        {}", result.examined);
    println!("   Eligible:        {}", result.eligible);
    println!("   Applied:         {}", result.applied);
    println!("   Below threshold: {}", result.below_threshold);
    if result.failed > 0 {
        println!("   Failed:          {}", result.failed);
        for err in &result.errors {
            println!("     ❌ {}: {}", err.transaction_id, err.reason);
        }
    }

    Ok(())
}

pub fn cmd_stats(engine: &CategorizationEngine, json: bool) -> Result<()> {
    let stats = engine.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("📊 Categorization");
    println!("   ─────────────────────────────");
    println!("   Total:            {}", stats.total);
    println!("   Confirmed:        {}", stats.user_confirmed);
    println!("   Auto-categorized: {}", stats.auto_categorized);
    println!("   Uncategorized:    {}", stats.uncategorized);
    println!("   Unclassified:     {}", stats.unclassified);
    println!("   Needs review:     {}", stats.needs_review);
    if !stats.by_source.is_empty() {
        println!();
        println!("   By source:");
        for entry in &stats.by_source {
            println!("     {:10} {}", entry.source.as_str(), entry.count);
        }
    }

    Ok(())
}
