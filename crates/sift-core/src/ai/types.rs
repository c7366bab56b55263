//! External classifier response types

use serde::{Deserialize, Serialize};

use crate::models::Classification;

fn default_confidence() -> f64 {
    0.5
}

/// Result of asking an external backend to categorize a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalClassification {
    /// "personal" or "business" (anything else reads as unset)
    #[serde(default)]
    pub classification: Option<String>,
    /// Category name, resolved against the category directory by the caller
    pub category: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}

impl ExternalClassification {
    /// Parsed classification; unknown values read as unset
    pub fn classification(&self) -> Classification {
        self.classification
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or_default()
    }

    /// Confidence clamped into [0, 1]; non-finite values read as 0
    pub fn bounded_confidence(&self) -> f64 {
        if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
