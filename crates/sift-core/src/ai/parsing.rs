//! JSON parsing helpers for external backend responses
//!
//! Models often wrap the JSON payload in extra prose, so the parser looks for
//! the outermost `{ ... }` span.

use crate::error::{Error, Result};

use super::types::ExternalClassification;

/// Truncate raw model output for error messages
fn truncate(text: &str) -> String {
    if text.chars().count() > 200 {
        format!("{}...", text.chars().take(200).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Parse a transaction classification from a model response
pub fn parse_external_classification(response: &str) -> Result<ExternalClassification> {
    let response = response.trim();

    let start = response.find('{');
    let end = response.rfind('}');

    match (start, end) {
        (Some(s), Some(e)) if s < e => {
            let json_str = &response[s..=e];
            serde_json::from_str(json_str).map_err(|e| {
                Error::InvalidData(format!(
                    "Invalid JSON from AI: {} | Raw: {}",
                    e,
                    truncate(json_str)
                ))
            })
        }
        _ => Err(Error::InvalidData(format!(
            "No JSON found in AI response | Raw: {}",
            truncate(response)
        ))),
    }
}
