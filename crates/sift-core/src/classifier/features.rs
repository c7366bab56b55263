//! Feature extraction for the transaction classifier

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Transaction;
use crate::rules::normalize_merchant;

fn card_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}[-*]+\d{4}[-*]+\d{4}|\*+\d+").expect("valid regex")
    })
}

fn suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s+(nz|ltd|limited|inc|pty|co)\s*$").expect("valid regex")
    })
}

/// Strip card-number fragments and trailing corporate suffixes
pub fn clean_merchant(raw: &str) -> String {
    let text = normalize_merchant(raw);
    let text = card_number_re().replace_all(&text, " ");
    let text = normalize_merchant(&text);
    let text = suffix_re().replace(&text, "");
    normalize_merchant(&text)
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !t.chars().all(|c| c.is_ascii_digit()))
        .map(|t| t.to_string())
}

/// Magnitude bucket for an absolute amount
pub fn amount_bucket(amount: f64) -> &'static str {
    let amount = amount.abs();
    if amount < 10.0 {
        "tiny"
    } else if amount < 50.0 {
        "small"
    } else if amount < 100.0 {
        "medium"
    } else if amount < 500.0 {
        "large"
    } else {
        "xlarge"
    }
}

/// Extract feature tokens, or `None` if the row is unusable
///
/// A row is unusable when it has no merchant or details tokens or a
/// non-finite amount.
pub fn extract(tx: &Transaction) -> Option<Vec<String>> {
    if !tx.amount.is_finite() {
        return None;
    }

    let mut tokens: Vec<String> = Vec::new();

    let merchant = clean_merchant(tx.merchant_code.as_deref().unwrap_or(""));
    tokens.extend(tokenize(&merchant));

    let details = clean_merchant(tx.details.as_deref().unwrap_or(""));
    if details != merchant {
        tokens.extend(tokenize(&details).map(|t| format!("d:{}", t)));
    }

    if tokens.is_empty() {
        return None;
    }

    tokens.push(if tx.amount < 0.0 {
        "sign:debit".to_string()
    } else {
        "sign:credit".to_string()
    });
    tokens.push(format!("amount:{}", amount_bucket(tx.amount)));

    if let Some(kind) = tx.type_code.as_deref() {
        let kind = normalize_merchant(kind);
        if !kind.is_empty() {
            tokens.push(format!("type:{}", kind));
        }
    }

    Some(tokens)
}
