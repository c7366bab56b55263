//! Transaction command implementations

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sift_core::db::Database;
use sift_core::models::NewTransaction;

use super::{format_amount, resolve_account, truncate};

pub fn cmd_tx_add(
    db: &Database,
    account: &str,
    date: &str,
    amount: f64,
    merchant: Option<&str>,
    details: Option<&str>,
    type_code: Option<&str>,
) -> Result<i64> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .context("Invalid --date format (use YYYY-MM-DD)")?;
    if merchant.map_or(true, |m| m.trim().is_empty())
        && details.map_or(true, |d| d.trim().is_empty())
    {
        anyhow::bail!("Provide --merchant or --details so the transaction can be matched");
    }

    let account_id = db.upsert_account(account)?;
    let id = db.insert_transaction(&NewTransaction {
        account_id,
        date,
        amount,
        merchant_code: merchant.map(str::to_string),
        details: details.map(str::to_string),
        type_code: type_code.map(str::to_string),
    })?;

    println!("✅ Added transaction {} to '{}'", id, account);
    println!("   {} │ {} │ {}", date, format_amount(amount), merchant.or(details).unwrap_or(""));

    Ok(id)
}

pub fn cmd_tx_list(db: &Database, account: Option<&str>, limit: i64) -> Result<()> {
    let account_id = account.map(|a| resolve_account(db, a)).transpose()?;
    let transactions = db.list_transactions(account_id, limit)?;

    if transactions.is_empty() {
        println!("No transactions found. Add some with:");
        println!("  sift tx add -a Everyday -d 2024-01-31 --amount -12.50 -m \"MERCHANT\"");
        return Ok(());
    }

    println!();
    println!("📝 Recent Transactions");
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in transactions {
        let lock = if tx.is_user_confirmed { "🔒" } else { "  " };
        println!(
            "   [{:>5}] {} │ {:>10} │ {} {:8} │ {}",
            tx.id,
            tx.date,
            format_amount(tx.amount),
            lock,
            tx.categorization_source.as_str(),
            truncate(&tx.description(), 40)
        );
    }

    Ok(())
}

pub fn cmd_tx_show(db: &Database, id: i64, json: bool) -> Result<()> {
    let tx = db
        .get_transaction(id)?
        .ok_or_else(|| anyhow::anyhow!("Transaction {} not found", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tx)?);
        return Ok(());
    }

    let category = match tx.category_id {
        Some(cid) => db.get_category(cid)?.map(|c| c.name),
        None => None,
    };

    println!();
    println!("📄 Transaction {}", tx.id);
    println!("   ─────────────────────────────────────────────");
    println!("   Date:           {}", tx.date);
    println!("   Amount:         {}", format_amount(tx.amount));
    println!("   Description:    {}", tx.description());
    println!("   Classification: {}", tx.classification);
    println!(
        "   Category:       {}",
        category.as_deref().unwrap_or("(none)")
    );
    println!("   Source:         {}", tx.categorization_source);
    println!(
        "   Status:         {}",
        if tx.is_user_confirmed {
            "🔒 confirmed by you"
        } else if tx.is_reviewed {
            "reviewed"
        } else {
            "awaiting review"
        }
    );

    Ok(())
}
