//! Checkpoint state for resumable migrations.
//!
//! A [`MigrationCheckpoint`] is created when a run starts, updated after every
//! table finishes, and deleted once the run completes. A resumed run reads it
//! back to skip tables that are already done.

mod backend;
mod file;

pub use backend::CheckpointStore;
pub use file::{CheckpointLock, FileCheckpointStore};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::core::traits::RecordError;
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Persisted progress of one migration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationCheckpoint {
    /// Timestamp-based identifier, e.g. `migration_20260301_141500`.
    pub migration_id: String,

    /// SHA256 hash of the endpoint configuration.
    pub config_hash: String,

    /// Fingerprint of the schema descriptor the run was started with.
    pub schema_fingerprint: String,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Results of every table that finished, keyed by table name.
    pub tables_migrated: BTreeMap<String, TableResult>,

    /// Records written across all finished tables.
    pub records_migrated: u64,

    /// Run-level errors collected so far.
    #[serde(default)]
    pub errors: Vec<String>,

    /// HMAC-SHA256 over the serialized checkpoint (without this field),
    /// keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Outcome of one table transfer. Never changed after the table finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub records_migrated: u64,
    pub records_failed: u64,
    #[serde(default)]
    pub errors: Vec<RecordError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TableResult {
    /// Result for a table with no source rows.
    pub fn empty() -> Self {
        Self {
            records_migrated: 0,
            records_failed: 0,
            errors: Vec::new(),
            completed_at: Some(Utc::now()),
        }
    }

    /// Percentage of attempted records that were rejected.
    pub fn failure_percent(&self) -> f64 {
        let attempted = self.records_migrated + self.records_failed;
        if attempted == 0 {
            return 0.0;
        }
        self.records_failed as f64 / attempted as f64 * 100.0
    }
}

impl MigrationCheckpoint {
    /// Create a checkpoint for a fresh run.
    pub fn new(
        migration_id: impl Into<String>,
        config_hash: impl Into<String>,
        schema_fingerprint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            migration_id: migration_id.into(),
            config_hash: config_hash.into(),
            schema_fingerprint: schema_fingerprint.into(),
            started_at: now,
            updated_at: now,
            tables_migrated: BTreeMap::new(),
            records_migrated: 0,
            errors: Vec::new(),
            hmac: None,
        }
    }

    /// Refuse to resume when the endpoints or the descriptor changed.
    pub fn validate_config(&self, config_hash: &str, schema_fingerprint: &str) -> Result<()> {
        if self.config_hash != config_hash || self.schema_fingerprint != schema_fingerprint {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    pub fn is_table_completed(&self, table: &str) -> bool {
        self.tables_migrated.contains_key(table)
    }

    /// Record a finished table. A table is only ever recorded once.
    pub fn record_table(&mut self, table: impl Into<String>, result: TableResult) {
        let table = table.into();
        if self.tables_migrated.contains_key(&table) {
            return;
        }
        self.records_migrated += result.records_migrated;
        self.tables_migrated.insert(table, result);
        self.updated_at = Utc::now();
    }

    /// Records rejected across all finished tables.
    pub fn records_failed(&self) -> u64 {
        self.tables_migrated.values().map(|t| t.records_failed).sum()
    }

    /// Compute the HMAC-SHA256 signature of this checkpoint.
    pub(crate) fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)?;
        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Attach a fresh signature.
    pub(crate) fn sign(&mut self) -> Result<()> {
        self.hmac = Some(self.compute_hmac()?);
        Ok(())
    }

    /// Check the stored signature. Unsigned checkpoints are accepted with a warning.
    pub(crate) fn verify_signature(&self) -> Result<()> {
        match &self.hmac {
            Some(stored) => {
                if *stored != self.compute_hmac()? {
                    return Err(MigrateError::State(format!(
                        "checkpoint {} failed its integrity check (HMAC mismatch)",
                        self.migration_id
                    )));
                }
            }
            None => tracing::warn!(
                "Checkpoint {} has no HMAC signature, integrity cannot be verified",
                self.migration_id
            ),
        }
        Ok(())
    }
}

/// Timestamp-based migration id for a run starting now.
pub fn new_migration_id() -> String {
    format!("migration_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(migrated: u64, failed: u64) -> TableResult {
        TableResult {
            records_migrated: migrated,
            records_failed: failed,
            errors: Vec::new(),
            completed_at: None,
        }
    }

    #[test]
    fn test_record_table_accumulates_once() {
        let mut checkpoint = MigrationCheckpoint::new("m1", "hash", "fp");
        checkpoint.record_table("skills", result(3, 0));
        checkpoint.record_table("resources", result(4, 1));
        checkpoint.record_table("skills", result(99, 0));

        assert_eq!(checkpoint.records_migrated, 7);
        assert_eq!(checkpoint.records_failed(), 1);
        assert!(checkpoint.is_table_completed("skills"));
        assert!(!checkpoint.is_table_completed("users"));
        assert_eq!(checkpoint.tables_migrated["skills"].records_migrated, 3);
    }

    #[test]
    fn test_validate_config() {
        let checkpoint = MigrationCheckpoint::new("m1", "hash", "fp");
        assert!(checkpoint.validate_config("hash", "fp").is_ok());
        assert!(matches!(
            checkpoint.validate_config("other", "fp"),
            Err(MigrateError::ConfigChanged)
        ));
        assert!(checkpoint.validate_config("hash", "other").is_err());
    }

    #[test]
    fn test_signature_detects_tampering() {
        let mut checkpoint = MigrationCheckpoint::new("m1", "hash", "fp");
        checkpoint.record_table("skills", result(3, 0));
        checkpoint.sign().unwrap();
        assert!(checkpoint.verify_signature().is_ok());

        checkpoint.records_migrated = 1000;
        assert!(checkpoint.verify_signature().is_err());
    }

    #[test]
    fn test_failure_percent() {
        assert_eq!(result(0, 0).failure_percent(), 0.0);
        assert_eq!(result(3, 1).failure_percent(), 25.0);
        assert_eq!(TableResult::empty().records_migrated, 0);
    }

    #[test]
    fn test_migration_id_format() {
        let id = new_migration_id();
        assert!(id.starts_with("migration_"));
        assert_eq!(id.len(), "migration_20260101_000000".len());
    }
}
