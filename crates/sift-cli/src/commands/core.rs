//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` / `open_engine` - Shared utilities to open the database and engine
//! - `cmd_init` - Initialize the database
//! - `cmd_categories` - List categories
//! - argument resolvers for account and category names

use std::path::Path;

use anyhow::{Context, Result};
use sift_core::db::{Database, DB_KEY_ENV};
use sift_core::{AIClient, CategorizationEngine, EngineConfig};
use tracing::warn;

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

/// Open the database and wrap it in an engine
pub fn open_engine(
    db_path: &Path,
    no_encrypt: bool,
    config_path: Option<&Path>,
) -> Result<CategorizationEngine> {
    let db = open_db(db_path, no_encrypt)?;
    engine_for(db, config_path)
}

/// Build an engine over an open database, restoring the latest classifier
pub fn engine_for(db: Database, config_path: Option<&Path>) -> Result<CategorizationEngine> {
    let config = EngineConfig::load_from(config_path).context("Failed to load engine config")?;
    let engine = CategorizationEngine::new(db, config, AIClient::from_env())
        .context("Failed to build categorization engine")?;

    if let Err(e) = engine.load_classifier() {
        warn!(error = %e, "Could not restore classifier; continuing without it");
    }
    Ok(engine)
}

pub fn cmd_init(db_path: &Path, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    db.seed_default_categories()
        .context("Failed to seed categories")?;
    println!("   Seeded default categories");

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED ({})", DB_KEY_ENV);
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Add transactions: sift tx add -a Everyday -d 2024-01-31 --amount -12.50 -m \"MERCHANT\"");
    println!("  2. Review the queue: sift suggest");
    println!("  3. Start web API:    sift serve");

    Ok(())
}

pub fn cmd_categories(db: &Database) -> Result<()> {
    let categories = db.list_categories()?;

    if categories.is_empty() {
        println!("No categories. Run 'sift init' to seed the defaults.");
        return Ok(());
    }

    println!();
    println!("🗂  Categories");
    println!("   ─────────────────────────────────────────────");
    for c in categories {
        println!(
            "   {:>4} │ {:24} │ {}",
            c.id,
            c.name,
            if c.is_income { "income" } else { "spending" }
        );
    }

    Ok(())
}

/// Find an existing account by name (case-insensitive)
pub fn resolve_account(db: &Database, name: &str) -> Result<i64> {
    db.list_accounts()?
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
        .map(|a| a.id)
        .ok_or_else(|| anyhow::anyhow!("Account '{}' not found", name))
}

/// Category by numeric ID or by name
pub fn resolve_category(db: &Database, arg: &str) -> Result<i64> {
    if let Ok(id) = arg.trim().parse::<i64>() {
        return db
            .get_category(id)?
            .map(|c| c.id)
            .ok_or_else(|| anyhow::anyhow!("Category {} not found", id));
    }
    db.find_category_by_name(arg)?
        .map(|c| c.id)
        .ok_or_else(|| anyhow::anyhow!("Category '{}' not found (see 'sift categories')", arg))
}
