//! HTTP request handlers organized by domain
//!
//! Each submodule contains handlers for a specific API area.

pub mod categories;
pub mod categorization;
pub mod classifier;
pub mod health;
pub mod transactions;

// Re-export all handlers for use in router
pub use categories::*;
pub use categorization::*;
pub use classifier::*;
pub use health::*;
pub use transactions::*;
