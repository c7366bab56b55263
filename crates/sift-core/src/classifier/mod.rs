//! Trainable transaction classifier
//!
//! The current model lives behind a single swap slot
//! (`RwLock<Option<Arc<ClassifierArtifact>>>`). Predictions clone the `Arc` and
//! release the lock immediately; a successful training run replaces the whole
//! slot. An artifact is never mutated after it is installed.

mod features;
mod model;

pub use features::{amount_bucket, clean_merchant, extract as extract_features};
pub use model::{Label, NaiveBayes};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Classification, Transaction};

/// Every Nth sample of a label (by transaction id) goes to the holdout set
const HOLDOUT_EVERY: usize = 5;

/// A trained, immutable model plus its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    /// Row id in `classifier_artifacts` (assigned on save)
    #[serde(default)]
    pub version: i64,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub skipped: usize,
    pub accuracy: Option<f64>,
    /// Category id -> is_income, captured at training time
    pub income_categories: HashMap<i64, bool>,
    pub model: NaiveBayes,
}

impl ClassifierArtifact {
    pub fn label_count(&self) -> usize {
        self.model.labels().len()
    }

    /// Predict with this artifact specifically
    pub fn predict(&self, tx: &Transaction) -> Option<Prediction> {
        let tokens = extract_features(tx)?;
        self.predict_tokens(&tokens, tx.is_credit())
    }

    /// Predict from already-extracted tokens and the credit/debit side
    fn predict_tokens(&self, tokens: &[String], is_credit: bool) -> Option<Prediction> {
        let income = &self.income_categories;
        let (label, confidence) = self.model.predict(tokens, |label| match label.category_id {
            None => true,
            Some(id) => income.get(&id).map(|inc| *inc == is_credit).unwrap_or(true),
        })?;
        Some(Prediction {
            classification: label.classification,
            category_id: label.category_id,
            confidence,
        })
    }
}

/// A model prediction for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub classification: Classification,
    pub category_id: Option<i64>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainStatus {
    Trained,
    InsufficientData,
}

/// Result of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub status: TrainStatus,
    pub sample_count: usize,
    pub skipped: usize,
    pub label_count: usize,
    pub accuracy: Option<f64>,
    pub version: Option<i64>,
}

/// Snapshot of the current artifact's metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierStats {
    pub trained: bool,
    pub version: Option<i64>,
    pub sample_count: usize,
    pub skipped: usize,
    pub label_count: usize,
    pub accuracy: Option<f64>,
    pub trained_at: Option<DateTime<Utc>>,
}

/// One usable training row
struct Sample {
    tokens: Vec<String>,
    label: Label,
    is_credit: bool,
}

/// Turn confirmed transactions into samples, counting the unusable ones
fn build_samples(rows: &[Transaction]) -> (Vec<Sample>, usize) {
    let mut samples = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for tx in rows {
        let has_target = tx.classification != Classification::Unset || tx.category_id.is_some();
        match extract_features(tx) {
            Some(tokens) if has_target => samples.push(Sample {
                tokens,
                label: Label {
                    classification: tx.classification,
                    category_id: tx.category_id,
                },
                is_credit: tx.is_credit(),
            }),
            _ => skipped += 1,
        }
    }
    (samples, skipped)
}

/// Deterministic stratified split: (train, holdout) index lists
///
/// Samples arrive ordered by transaction id, so position within a label is
/// stable across runs.
fn stratified_split(samples: &[Sample]) -> (Vec<usize>, Vec<usize>) {
    let mut seen: HashMap<Label, usize> = HashMap::new();
    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for (i, sample) in samples.iter().enumerate() {
        let n = seen.entry(sample.label).or_insert(0);
        if *n % HOLDOUT_EVERY == HOLDOUT_EVERY - 1 {
            holdout.push(i);
        } else {
            train.push(i);
        }
        *n += 1;
    }
    (train, holdout)
}

fn fit(samples: &[Sample], indices: &[usize]) -> NaiveBayes {
    NaiveBayes::fit(
        indices
            .iter()
            .map(|&i| (samples[i].tokens.as_slice(), samples[i].label)),
    )
}

/// Holdout accuracy of a model fit on the training part only
fn holdout_accuracy(
    samples: &[Sample],
    income_categories: &HashMap<i64, bool>,
) -> Option<f64> {
    let (train, holdout) = stratified_split(samples);
    if holdout.is_empty() || train.is_empty() {
        return None;
    }
    let split_model = ClassifierArtifact {
        version: 0,
        trained_at: Utc::now(),
        sample_count: train.len(),
        skipped: 0,
        accuracy: None,
        income_categories: income_categories.clone(),
        model: fit(samples, &train),
    };
    let correct = holdout
        .iter()
        .filter(|&&i| {
            let sample = &samples[i];
            split_model
                .predict_tokens(&sample.tokens, sample.is_credit)
                .map(|p| p.classification == sample.label.classification
                    && p.category_id == sample.label.category_id)
                .unwrap_or(false)
        })
        .count();
    Some(correct as f64 / holdout.len() as f64)
}

fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// Classifier lifecycle: train, persist, load, predict
#[derive(Default)]
pub struct Classifier {
    current: RwLock<Option<Arc<ClassifierArtifact>>>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The artifact currently serving predictions
    pub fn current(&self) -> Option<Arc<ClassifierArtifact>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in `artifact` unless an equal or newer version is already serving
    fn install(&self, artifact: Arc<ClassifierArtifact>) -> bool {
        let mut slot = self.current.write().unwrap_or_else(|e| e.into_inner());
        if let Some(serving) = slot.as_ref() {
            if serving.version >= artifact.version {
                return false;
            }
        }
        *slot = Some(artifact);
        true
    }

    /// Predict a label for a transaction
    ///
    /// `None` when no model is loaded or the transaction has no usable features.
    pub fn predict(&self, tx: &Transaction) -> Option<Prediction> {
        self.current()?.predict(tx)
    }

    /// Train on user-confirmed transactions and swap in the new model
    ///
    /// Below `min_samples` usable rows the current artifact is left untouched
    /// and the report says `insufficient_data`. Blocking; async callers should
    /// run this under `spawn_blocking`.
    pub fn train(&self, db: &Database, min_samples: usize) -> Result<TrainReport> {
        self.train_cancellable(db, min_samples, &AtomicBool::new(false))
    }

    /// [`Classifier::train`] that gives up if `cancelled` is set before the
    /// new artifact is persisted
    ///
    /// Once persisted, the artifact is installed regardless, so the serving
    /// model and the newest stored version never diverge.
    pub fn train_cancellable(
        &self,
        db: &Database,
        min_samples: usize,
        cancelled: &AtomicBool,
    ) -> Result<TrainReport> {
        let rows = db.list_user_confirmed()?;
        let (samples, skipped) = build_samples(&rows);

        match self.train_samples(db, &samples, skipped, min_samples, cancelled) {
            Ok(artifact) => {
                let report = TrainReport {
                    status: TrainStatus::Trained,
                    sample_count: artifact.sample_count,
                    skipped,
                    label_count: artifact.label_count(),
                    accuracy: artifact.accuracy,
                    version: Some(artifact.version),
                };
                info!(
                    version = artifact.version,
                    samples = artifact.sample_count,
                    labels = artifact.label_count(),
                    accuracy = ?artifact.accuracy,
                    "Classifier trained"
                );
                if !self.install(artifact) {
                    warn!(
                        version = ?report.version,
                        "A newer classifier is already serving; keeping it"
                    );
                }
                Ok(report)
            }
            Err(Error::InsufficientData { needed, found }) => {
                info!(needed, found, "Not enough confirmed transactions to train");
                Ok(TrainReport {
                    status: TrainStatus::InsufficientData,
                    sample_count: found,
                    skipped,
                    label_count: 0,
                    accuracy: None,
                    version: self.current().map(|a| a.version),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn train_samples(
        &self,
        db: &Database,
        samples: &[Sample],
        skipped: usize,
        min_samples: usize,
        cancelled: &AtomicBool,
    ) -> Result<Arc<ClassifierArtifact>> {
        if samples.is_empty() || samples.len() < min_samples {
            return Err(Error::InsufficientData {
                needed: min_samples.max(1),
                found: samples.len(),
            });
        }

        let income_categories: HashMap<i64, bool> = db
            .list_categories()?
            .into_iter()
            .map(|c| (c.id, c.is_income))
            .collect();

        let accuracy = holdout_accuracy(samples, &income_categories);
        let all: Vec<usize> = (0..samples.len()).collect();

        let mut artifact = ClassifierArtifact {
            version: 0,
            trained_at: Utc::now(),
            sample_count: samples.len(),
            skipped,
            accuracy,
            income_categories,
            model: fit(samples, &all),
        };

        if cancelled.load(Ordering::SeqCst) {
            return Err(Error::Background("training cancelled".to_string()));
        }

        let payload = serde_json::to_string(&artifact)?;
        artifact.version =
            db.save_artifact(&payload, &checksum(&payload), artifact.sample_count, accuracy)?;
        Ok(Arc::new(artifact))
    }

    /// Restore the newest persisted artifact, returning its version
    ///
    /// An artifact whose checksum does not verify is ignored.
    pub fn load_latest(&self, db: &Database) -> Result<Option<i64>> {
        let Some(stored) = db.latest_artifact()? else {
            return Ok(None);
        };

        if checksum(&stored.payload) != stored.checksum {
            warn!(
                version = stored.version,
                "Classifier artifact checksum mismatch, ignoring"
            );
            return Ok(None);
        }

        let mut artifact: ClassifierArtifact = serde_json::from_str(&stored.payload)?;
        artifact.version = stored.version;
        artifact.model.rebuild_index();

        info!(
            version = stored.version,
            samples = artifact.sample_count,
            "Loaded classifier artifact"
        );
        self.install(Arc::new(artifact));
        Ok(self.current().map(|a| a.version))
    }

    pub fn stats(&self) -> ClassifierStats {
        match self.current() {
            Some(a) => ClassifierStats {
                trained: true,
                version: Some(a.version),
                sample_count: a.sample_count,
                skipped: a.skipped,
                label_count: a.label_count(),
                accuracy: a.accuracy,
                trained_at: Some(a.trained_at),
            },
            None => ClassifierStats::default(),
        }
    }
}
