//! Sift CLI - Adaptive transaction categorization
//!
//! Usage:
//!   sift init                          Initialize database
//!   sift tx add -a Everyday ...        Add a transaction
//!   sift suggest                       Review queue with suggestions
//!   sift apply 42 -c personal -g Groceries
//!   sift serve --port 3000             Start web server

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, cli.no_encrypt),
        Commands::Tx { action } => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            match action {
                TxAction::Add {
                    account,
                    date,
                    amount,
                    merchant,
                    details,
                    type_code,
                } => commands::cmd_tx_add(
                    &db,
                    &account,
                    &date,
                    amount,
                    merchant.as_deref(),
                    details.as_deref(),
                    type_code.as_deref(),
                )
                .map(|_| ()),
                TxAction::List { account, limit } => {
                    commands::cmd_tx_list(&db, account.as_deref(), limit)
                }
                TxAction::Show { id, json } => commands::cmd_tx_show(&db, id, json),
            }
        }
        Commands::Suggest {
            id,
            external,
            account,
            limit,
        } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            match id {
                Some(id) => commands::cmd_suggest_one(&engine, id, external)
                    .await
                    .map(|_| ()),
                None => commands::cmd_suggest_queue(&engine, account.as_deref(), limit).await,
            }
        }
        Commands::Apply {
            ids,
            classification,
            category,
            no_learn,
        } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_apply(
                &engine,
                &ids,
                &classification,
                category.as_deref(),
                !no_learn,
            )
            .await
        }
        Commands::Similar { id } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_similar(&engine, id)
        }
        Commands::Reset {
            id,
            no_recategorize,
        } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_reset(&engine, id, !no_recategorize).await
        }
        Commands::Auto { account, dry_run } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_auto(&engine, account.as_deref(), dry_run).await
        }
        Commands::Train { min_samples } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_train(&engine, min_samples).await.map(|_| ())
        }
        Commands::Classifier { predict } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            match predict {
                Some(id) => commands::cmd_classifier_predict(&engine, id),
                None => commands::cmd_classifier_stats(&engine),
            }
        }
        Commands::Rules { action } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            match action {
                None => commands::cmd_rules_list(&engine, 0.0),
                Some(RulesAction::List { min_confidence }) => {
                    commands::cmd_rules_list(&engine, min_confidence)
                }
                Some(RulesAction::Delete { id }) => commands::cmd_rules_delete(&engine, id),
                Some(RulesAction::Stats) => commands::cmd_rules_stats(&engine),
            }
        }
        Commands::Stats { json } => {
            let engine = commands::open_engine(&cli.db, cli.no_encrypt, config)?;
            commands::cmd_stats(&engine, json)
        }
        Commands::Categories => {
            let db = commands::open_db(&cli.db, cli.no_encrypt)?;
            commands::cmd_categories(&db)
        }
        Commands::Serve {
            port,
            host,
            no_auth,
            static_dir,
        } => {
            commands::cmd_serve(
                &cli.db,
                &host,
                port,
                no_auth,
                cli.no_encrypt,
                config,
                static_dir.as_deref(),
            )
            .await
        }
    }
}
