//! Classifier command implementations

use anyhow::Result;
use sift_core::{CategorizationEngine, TrainReport, TrainStatus};

use super::percent;

pub async fn cmd_train(
    engine: &CategorizationEngine,
    min_samples: Option<usize>,
) -> Result<TrainReport> {
    let needed = min_samples.unwrap_or(engine.config().min_training_samples);
    println!("🧠 Training classifier (minimum {} samples)...", needed);

    let report = engine.train_classifier(min_samples).await?;

    match report.status {
        TrainStatus::Trained => {
            println!(
                "✅ Trained v{} on {} samples across {} labels",
                report.version.unwrap_or_default(),
                report.sample_count,
                report.label_count
            );
            match report.accuracy {
                Some(acc) => println!("   Holdout accuracy: {}", percent(acc)),
                None => println!("   Holdout accuracy: (too few samples per label)"),
            }
        }
        TrainStatus::InsufficientData => {
            println!(
                "⏳ Not enough confirmed transactions yet: {} usable, {} needed",
                report.sample_count, needed
            );
            println!("   The current model (if any) is unchanged.");
        }
    }
    if report.skipped > 0 {
        println!("   Skipped {} rows with no usable features", report.skipped);
    }

    Ok(report)
}

pub fn cmd_classifier_stats(engine: &CategorizationEngine) -> Result<()> {
    let stats = engine.classifier_stats();

    println!();
    println!("🧠 Classifier");
    println!("   ─────────────────────────────");
    if !stats.trained {
        println!("   Not trained. Confirm some transactions, then run 'sift train'.");
        return Ok(());
    }
    println!("   Version:  v{}", stats.version.unwrap_or_default());
    if let Some(at) = stats.trained_at {
        println!("   Trained:  {}", at.format("%Y-%m-%d %H:%M"));
    }
    println!("   Samples:  {} ({} skipped)", stats.sample_count, stats.skipped);
    println!("   Labels:   {}", stats.label_count);
    if let Some(acc) = stats.accuracy {
        println!("   Accuracy: {}", percent(acc));
    }

    Ok(())
}

pub fn cmd_classifier_predict(engine: &CategorizationEngine, id: i64) -> Result<()> {
    match engine.predict(id)? {
        Some(p) => {
            let category = match p.category_id {
                Some(cid) => engine.db().get_category(cid)?.map(|c| c.name),
                None => None,
            };
            println!(
                "🧠 Transaction {}: {} / {} ({})",
                id,
                p.classification,
                category.as_deref().unwrap_or("no category"),
                percent(p.confidence)
            );
        }
        None => println!("🧠 Transaction {}: no prediction (untrained or no known features)", id),
    }
    Ok(())
}
