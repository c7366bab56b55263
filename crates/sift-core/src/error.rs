//! Error types for Sift

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Training was requested with fewer usable samples than required
    #[error("Insufficient training data: need {needed}, have {found}")]
    InsufficientData { needed: usize, found: usize },

    /// External classifier timed out, errored, or is not configured
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Background(String),

    /// An automated write targeted a user-confirmed transaction
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
