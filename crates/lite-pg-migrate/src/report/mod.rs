//! Structured reports consumed by operators and CI.
//!
//! A [`ValidationReport`] is produced by pre- and post-validation and never
//! changed afterwards; [`ValidationReporter`] is the builder that collects
//! statistics and issues while a validation phase runs. [`MigrationReport`]
//! wraps the phase reports of a whole run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::traits::SourceReader;
use crate::error::Result;
use crate::orchestrator::MigrationPhase;
use crate::schema::{EnsureReport, SchemaVerification};
use crate::state::{MigrationCheckpoint, TableResult};
use crate::verify::{DataLossReport, SampleValidation};

/// Overall outcome of a phase or run. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Warning,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Success => "success",
            ReportStatus::Warning => "warning",
            ReportStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row counts of one database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub database_type: String,
    pub total_records: i64,
    /// Row count per user table.
    pub tables: BTreeMap<String, i64>,
}

impl DatabaseStats {
    /// Count the rows of every user table.
    pub async fn collect(reader: &dyn SourceReader) -> Result<Self> {
        let mut stats = DatabaseStats {
            database_type: reader.db_type().to_string(),
            ..Default::default()
        };
        for table in reader.list_tables().await? {
            let count = reader.row_count(&table).await?;
            stats.total_records += count;
            stats.tables.insert(table, count);
        }
        Ok(stats)
    }
}

/// Result of a validation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stats: Option<DatabaseStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_stats: Option<DatabaseStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_compatibility: Option<SchemaVerification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_integrity: Option<DataLossReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_validation: Option<SampleValidation>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Collects the pieces of a [`ValidationReport`].
#[derive(Debug, Default)]
pub struct ValidationReporter {
    status: Option<ReportStatus>,
    source_stats: Option<DatabaseStats>,
    target_stats: Option<DatabaseStats>,
    schema_compatibility: Option<SchemaVerification>,
    data_integrity: Option<DataLossReport>,
    sample_validation: Option<SampleValidation>,
    issues: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_stats(&mut self, stats: DatabaseStats) -> &mut Self {
        self.source_stats = Some(stats);
        self
    }

    pub fn target_stats(&mut self, stats: DatabaseStats) -> &mut Self {
        self.target_stats = Some(stats);
        self
    }

    pub fn schema_compatibility(&mut self, verification: SchemaVerification) -> &mut Self {
        self.schema_compatibility = Some(verification);
        self
    }

    pub fn data_integrity(&mut self, loss: DataLossReport) -> &mut Self {
        self.data_integrity = Some(loss);
        self
    }

    pub fn sample_validation(&mut self, sample: SampleValidation) -> &mut Self {
        self.sample_validation = Some(sample);
        self
    }

    /// Record an issue without changing the status.
    pub fn issue(&mut self, message: impl Into<String>) -> &mut Self {
        self.issues.push(message.into());
        self
    }

    pub fn warning(&mut self, message: impl Into<String>) -> &mut Self {
        self.warnings.push(message.into());
        self
    }

    /// Raise the status to at least `status`.
    pub fn escalate(&mut self, status: ReportStatus) -> &mut Self {
        self.status = Some(self.status.map_or(status, |s| s.max(status)));
        self
    }

    /// Record an issue and mark the report as failed.
    pub fn fail(&mut self, message: impl Into<String>) -> &mut Self {
        self.issue(message).escalate(ReportStatus::Error)
    }

    pub fn status(&self) -> ReportStatus {
        self.status.unwrap_or(ReportStatus::Success)
    }

    pub fn finish(self) -> ValidationReport {
        ValidationReport {
            status: self.status.unwrap_or(ReportStatus::Success),
            source_stats: self.source_stats,
            target_stats: self.target_stats,
            schema_compatibility: self.schema_compatibility,
            data_integrity: self.data_integrity,
            sample_validation: self.sample_validation,
            issues: self.issues,
            warnings: self.warnings,
            generated_at: Utc::now(),
        }
    }
}

/// Result of the target preparation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparationReport {
    pub status: ReportStatus,
    pub schema: EnsureReport,
    pub verification: SchemaVerification,
}

/// Result of the data transfer phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataMigrationReport {
    pub records_migrated: u64,
    pub records_failed: u64,
    /// Every finished table, including tables finished by an earlier attempt.
    pub tables_migrated: BTreeMap<String, TableResult>,
    /// Tables skipped because the checkpoint already had them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables_resumed: Vec<String>,
    /// Tables whose transfer was aborted, with the rows written and the
    /// records rejected before the abort. They are not checkpointed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_tables: BTreeMap<String, TableResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl DataMigrationReport {
    /// Take the per-table results from `checkpoint`. Totals include the
    /// partial counts of `failed_tables`.
    pub fn absorb(&mut self, checkpoint: &MigrationCheckpoint) {
        let (partial_migrated, partial_failed) = self
            .failed_tables
            .values()
            .fold((0, 0), |(migrated, failed), t| {
                (migrated + t.records_migrated, failed + t.records_failed)
            });
        self.records_migrated = checkpoint.records_migrated + partial_migrated;
        self.records_failed = checkpoint.records_failed() + partial_failed;
        self.tables_migrated = checkpoint.tables_migrated.clone();
    }
}

/// Outcome of clearing the target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    pub attempted: bool,
    pub success: bool,
    pub tables_cleared: Vec<String>,
    pub errors: Vec<String>,
}

/// Per-phase details of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseReports {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_validation: Option<ValidationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_preparation: Option<PreparationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_migration: Option<DataMigrationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_validation: Option<ValidationReport>,
}

/// Headline numbers of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub total_records_migrated: u64,
    pub total_records_failed: u64,
    pub tables_migrated: usize,
    pub errors_encountered: usize,
    pub duration_seconds: f64,
}

/// Report of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migration_id: String,
    pub status: ReportStatus,
    pub final_phase: MigrationPhase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub phases: PhaseReports,
    pub summary: MigrationSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
    /// Process exit code: 0 only when the run completed.
    pub exit_code: u8,
}

impl MigrationReport {
    pub fn new(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            status: ReportStatus::Success,
            final_phase: MigrationPhase::Idle,
            started_at: Utc::now(),
            finished_at: None,
            phases: PhaseReports::default(),
            summary: MigrationSummary::default(),
            error: None,
            rollback: None,
            exit_code: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.final_phase == MigrationPhase::Completed
    }

    /// Fill in the summary from the data migration phase and stamp the end time.
    pub(crate) fn finalize(&mut self) {
        let finished_at = Utc::now();
        if let Some(data) = &self.phases.data_migration {
            self.summary.total_records_migrated = data.records_migrated;
            self.summary.total_records_failed = data.records_failed;
            self.summary.tables_migrated = data.tables_migrated.len();
            self.summary.errors_encountered = data.errors.len() + data.records_failed as usize;
        }
        self.summary.duration_seconds =
            (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        self.finished_at = Some(finished_at);
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
