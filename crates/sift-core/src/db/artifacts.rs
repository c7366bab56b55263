//! Persisted classifier artifacts

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;

/// Number of artifact versions retained on disk
const KEEP_VERSIONS: i64 = 5;

/// A serialized artifact row
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub version: i64,
    pub payload: String,
    pub checksum: String,
    pub sample_count: i64,
    pub accuracy: Option<f64>,
    pub trained_at: DateTime<Utc>,
}

impl Database {
    /// Store a new artifact version, returning the version number
    pub fn save_artifact(
        &self,
        payload: &str,
        checksum: &str,
        sample_count: usize,
        accuracy: Option<f64>,
    ) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO classifier_artifacts (payload, checksum, sample_count, accuracy)
            VALUES (?, ?, ?, ?)
            "#,
            params![payload, checksum, sample_count as i64, accuracy],
        )?;
        let version = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM classifier_artifacts WHERE id <= ?",
            params![version - KEEP_VERSIONS],
        )?;
        tx.commit()?;
        Ok(version)
    }

    /// Newest stored artifact, if any
    pub fn latest_artifact(&self) -> Result<Option<StoredArtifact>> {
        let conn = self.conn()?;
        let artifact = conn
            .query_row(
                r#"
                SELECT id, payload, checksum, sample_count, accuracy, trained_at
                FROM classifier_artifacts
                ORDER BY id DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    let trained_at_str: String = row.get(5)?;
                    Ok(StoredArtifact {
                        version: row.get(0)?,
                        payload: row.get(1)?,
                        checksum: row.get(2)?,
                        sample_count: row.get(3)?,
                        accuracy: row.get(4)?,
                        trained_at: parse_datetime(&trained_at_str),
                    })
                },
            )
            .optional()?;
        Ok(artifact)
    }
}
