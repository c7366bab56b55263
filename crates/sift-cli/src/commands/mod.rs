//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - init, categories, and shared utilities (open_db, open_engine)
//! - `transactions` - Transaction intake (add, list, show)
//! - `categorize` - Review queue, apply, similar, reset, auto, stats
//! - `classifier` - Training and model inspection
//! - `rules` - Learned rule management
//! - `serve` - Web server command

pub mod categorize;
pub mod classifier;
pub mod core;
pub mod rules;
pub mod serve;
pub mod transactions;

// Re-export command functions for main.rs
pub use categorize::*;
pub use classifier::*;
pub use core::*;
pub use rules::*;
pub use serve::*;
pub use transactions::*;

/// Truncate a string to a maximum length in characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Signed amount with terminal colors (red debits, green credits)
pub fn format_amount(amount: f64) -> String {
    if amount < 0.0 {
        format!("\x1b[31m${:.2}\x1b[0m", amount.abs())
    } else {
        format!("\x1b[32m+${:.2}\x1b[0m", amount)
    }
}

/// Confidence as a whole percentage
pub fn percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}
