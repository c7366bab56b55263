//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sift - Learn how you categorize transactions
#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Adaptive transaction categorization engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "sift.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set SIFT_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Engine config file (defaults to the platform data dir, then built-ins)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed default categories
    Init,

    /// Manage transactions (add, list, show)
    Tx {
        #[command(subcommand)]
        action: TxAction,
    },

    /// Show suggestions for the review queue, or for one transaction
    Suggest {
        /// Transaction ID (omit for the review queue)
        id: Option<i64>,

        /// Also ask the external classifier (single transaction only)
        #[arg(long)]
        external: bool,

        /// Restrict the queue to one account
        #[arg(short, long)]
        account: Option<String>,

        /// Maximum queue rows
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Confirm a categorization; learns a rule and propagates it
    Apply {
        /// Transaction IDs (more than one applies the same decision to each)
        #[arg(required = true, num_args = 1..)]
        ids: Vec<i64>,

        /// personal or business
        #[arg(short = 'c', long)]
        classification: String,

        /// Category name or ID
        #[arg(short = 'g', long)]
        category: Option<String>,

        /// Lock the transaction without teaching the rule
        #[arg(long)]
        no_learn: bool,
    },

    /// Preview which transactions an apply would propagate to
    Similar {
        /// Transaction ID
        id: i64,
    },

    /// Remove the user lock from a transaction
    Reset {
        /// Transaction ID
        id: i64,

        /// Leave the transaction uncategorized instead of re-suggesting
        #[arg(long)]
        no_recategorize: bool,
    },

    /// Categorize queued transactions whose confidence clears the threshold
    Auto {
        /// Restrict to one account
        #[arg(short, long)]
        account: Option<String>,

        /// Count only, write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Train the classifier from user-confirmed transactions
    Train {
        /// Minimum usable samples (defaults to the configured value)
        #[arg(long)]
        min_samples: Option<usize>,
    },

    /// Show classifier status, or predict one transaction
    Classifier {
        /// Transaction ID to run through the model only
        #[arg(long)]
        predict: Option<i64>,
    },

    /// Manage learned rules (list, delete, stats)
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Show categorization statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List categories
    Categories,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Disable authentication (for local development only)
        ///
        /// WARNING: Do not use this flag when exposing the server to a network.
        /// By default, the server requires a bearer key from SIFT_API_KEYS.
        #[arg(long)]
        no_auth: bool,

        /// Directory containing static files to serve (e.g., a review UI build)
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TxAction {
    /// Add a transaction to the review queue
    Add {
        /// Account name (created if missing)
        #[arg(short, long)]
        account: String,

        /// Date (YYYY-MM-DD)
        #[arg(short, long)]
        date: String,

        /// Amount (negative for debits)
        #[arg(long, allow_hyphen_values = true)]
        amount: f64,

        /// Merchant code as printed on the statement
        #[arg(short, long)]
        merchant: Option<String>,

        /// Free-text details
        #[arg(long)]
        details: Option<String>,

        /// Bank transaction type (e.g. EFTPOS, DD)
        #[arg(long)]
        type_code: Option<String>,
    },

    /// List recent transactions
    List {
        /// Restrict to one account
        #[arg(short, long)]
        account: Option<String>,

        /// Maximum rows
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show one transaction
    Show {
        /// Transaction ID
        id: i64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules, most confident first
    List {
        /// Hide rules below this confidence
        #[arg(long, default_value = "0")]
        min_confidence: f64,
    },

    /// Delete a rule (categorized transactions keep their values)
    Delete {
        /// Rule ID
        id: i64,
    },

    /// Show aggregate rule counters
    Stats,
}
