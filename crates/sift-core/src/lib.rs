//! Sift Core Library
//!
//! Adaptive transaction categorization:
//! - Database access and migrations
//! - Learned merchant rules with self-correcting confidence
//! - Trainable naive Bayes classifier with versioned artifacts
//! - Suggestion chain (user lock, rule, classifier, external backend)
//! - Apply/learn orchestration with propagation to similar transactions
//! - Pluggable local external classifier (Ollama)

pub mod ai;
pub mod apply;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod rules;
pub mod suggest;

/// Test utilities including mock Ollama server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIBackend, AIClient, ExternalClassification, MockBackend, OllamaBackend};
pub use apply::{
    ApplyResult, AutoCategorizeResult, BulkApplyResult, ResetResult, RuleChange,
    SimilarTransactions, SkippedRow, TransactionLocks,
};
pub use classifier::{Classifier, ClassifierStats, Prediction, TrainReport, TrainStatus};
pub use config::EngineConfig;
pub use db::Database;
pub use engine::CategorizationEngine;
pub use error::{Error, Result};
pub use rules::{normalize_merchant, ChainStores, MerchantPattern, RuleOutcome};
pub use suggest::{Strategy, Suggester};
