//! Multinomial naive Bayes over feature tokens

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::Classification;

/// Laplace smoothing constant
const ALPHA: f64 = 1.0;

/// Joint classification/category target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub classification: Classification,
    pub category_id: Option<i64>,
}

/// Trained model parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayes {
    labels: Vec<Label>,
    /// Documents per label
    doc_counts: Vec<u32>,
    /// Token occurrences per label
    token_counts: Vec<HashMap<String, u32>>,
    /// Total token occurrences per label
    token_totals: Vec<u64>,
    vocabulary_size: usize,
    total_docs: u32,
    #[serde(skip)]
    vocabulary: Option<std::collections::HashSet<String>>,
}

impl NaiveBayes {
    /// Fit on `(tokens, label)` samples; labels keep first-seen order
    pub fn fit<'a>(samples: impl IntoIterator<Item = (&'a [String], Label)>) -> Self {
        let mut labels: Vec<Label> = Vec::new();
        let mut index: HashMap<Label, usize> = HashMap::new();
        let mut doc_counts: Vec<u32> = Vec::new();
        let mut token_counts: Vec<HashMap<String, u32>> = Vec::new();
        let mut token_totals: Vec<u64> = Vec::new();
        let mut vocabulary = std::collections::HashSet::new();
        let mut total_docs = 0u32;

        for (tokens, label) in samples {
            let i = *index.entry(label).or_insert_with(|| {
                labels.push(label);
                doc_counts.push(0);
                token_counts.push(HashMap::new());
                token_totals.push(0);
                labels.len() - 1
            });
            doc_counts[i] += 1;
            total_docs += 1;
            for token in tokens {
                *token_counts[i].entry(token.clone()).or_insert(0) += 1;
                token_totals[i] += 1;
                vocabulary.insert(token.clone());
            }
        }

        Self {
            labels,
            doc_counts,
            token_counts,
            token_totals,
            vocabulary_size: vocabulary.len(),
            total_docs,
            vocabulary: Some(vocabulary),
        }
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    fn knows(&self, token: &str) -> bool {
        match &self.vocabulary {
            Some(vocab) => vocab.contains(token),
            None => self.token_counts.iter().any(|c| c.contains_key(token)),
        }
    }

    /// Rebuild the lookup set after deserialization
    pub fn rebuild_index(&mut self) {
        let vocab = self
            .token_counts
            .iter()
            .flat_map(|c| c.keys().cloned())
            .collect();
        self.vocabulary = Some(vocab);
    }

    /// Most probable label among those `allowed`, with its posterior
    ///
    /// Posteriors are normalized over the allowed labels only. If no label is
    /// allowed, every label is considered. Returns `None` when no token is in
    /// the vocabulary.
    pub fn predict(&self, tokens: &[String], allowed: impl Fn(&Label) -> bool) -> Option<(Label, f64)> {
        if self.labels.is_empty() || self.total_docs == 0 {
            return None;
        }
        let known: Vec<&String> = tokens.iter().filter(|t| self.knows(t)).collect();
        if known.is_empty() {
            return None;
        }

        let mut candidates: Vec<usize> = (0..self.labels.len())
            .filter(|&i| allowed(&self.labels[i]))
            .collect();
        if candidates.is_empty() {
            candidates = (0..self.labels.len()).collect();
        }

        let vocab = self.vocabulary_size as f64;
        let scores: Vec<(usize, f64)> = candidates
            .into_iter()
            .map(|i| {
                let prior = (self.doc_counts[i] as f64 / self.total_docs as f64).ln();
                let denom = self.token_totals[i] as f64 + ALPHA * vocab;
                let likelihood: f64 = known
                    .iter()
                    .map(|t| {
                        let count = self.token_counts[i].get(t.as_str()).copied().unwrap_or(0);
                        ((count as f64 + ALPHA) / denom).ln()
                    })
                    .sum();
                (i, prior + likelihood)
            })
            .collect();

        // Softmax over log scores
        let max = scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let total: f64 = scores.iter().map(|(_, s)| (s - max).exp()).sum();
        let (best, best_score) = scores
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))?;

        let confidence = ((best_score - max).exp() / total).clamp(0.0, 1.0);
        Some((self.labels[best], confidence))
    }
}
