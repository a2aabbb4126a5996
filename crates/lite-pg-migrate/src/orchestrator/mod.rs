//! Migration orchestrator - phased workflow coordinator.
//!
//! [`MigrationManager`] owns both connections, the descriptor and the
//! checkpoint store, and drives a run through the [`MigrationPhase`] state
//! machine. Per-record failures are collected; anything else that goes wrong
//! inside a phase moves the run to `Failed` and offers a rollback through the
//! injected [`RollbackDecider`].

mod health;
mod phase;
mod rollback;

pub use health::HealthCheckResult;
pub use phase::{MigrationPhase, PhaseTracker};
pub use rollback::{rollback_target, AlwaysRollback, NeverRollback, RollbackDecider};

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::core::schema::{SchemaDescriptor, TableSpec};
use crate::core::traits::{SourceReader, TargetWriter};
use crate::drivers::Connection;
use crate::error::{MigrateError, Result};
use crate::report::{
    DataMigrationReport, DatabaseStats, MigrationReport, PreparationReport, ReportStatus,
    RollbackReport, ValidationReport, ValidationReporter,
};
use crate::schema::SchemaManager;
use crate::state::{
    new_migration_id, CheckpointStore, FileCheckpointStore, MigrationCheckpoint, TableResult,
};
use crate::transfer::{transfer_table, TablePlan};
use crate::verify::{data_loss, sample_validate};

/// Migration orchestrator.
pub struct MigrationManager {
    config: Config,
    descriptor: SchemaDescriptor,
    source: Connection,
    target: Connection,
    schema_manager: SchemaManager,
    store: Arc<dyn CheckpointStore>,
    decider: Box<dyn RollbackDecider>,
    migration_id: String,
    checkpoint: Option<MigrationCheckpoint>,
    tracker: PhaseTracker,
}

impl MigrationManager {
    /// Connect to both endpoints named in `config`.
    pub async fn connect(config: Config, descriptor: SchemaDescriptor) -> Result<Self> {
        config.validate()?;
        descriptor.validate()?;
        let schema_manager = SchemaManager::new(config.migration.max_connections)
            .with_sqlite_backup(config.migration.backup_sqlite_target);
        let source = schema_manager.connect(&config.source.dsn).await?;
        let target = schema_manager.connect(&config.target.dsn).await?;
        Ok(Self::new(config, descriptor, source, target))
    }

    /// Build a manager around existing connections.
    ///
    /// Checkpoints go to `migration.checkpoint_dir`; failed runs are not rolled
    /// back unless a decider says otherwise.
    pub fn new(
        config: Config,
        descriptor: SchemaDescriptor,
        source: Connection,
        target: Connection,
    ) -> Self {
        let schema_manager = SchemaManager::new(config.migration.max_connections)
            .with_sqlite_backup(config.migration.backup_sqlite_target);
        let store = Arc::new(FileCheckpointStore::new(
            config.migration.checkpoint_dir.clone(),
        ));
        Self {
            config,
            descriptor,
            source,
            target,
            schema_manager,
            store,
            decider: Box::new(NeverRollback),
            migration_id: new_migration_id(),
            checkpoint: None,
            tracker: PhaseTracker::new(),
        }
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_rollback_decider(mut self, decider: impl RollbackDecider + 'static) -> Self {
        self.decider = Box::new(decider);
        self
    }

    pub fn with_migration_id(mut self, migration_id: impl Into<String>) -> Self {
        self.migration_id = migration_id.into();
        self
    }

    /// Load a checkpoint to continue from.
    ///
    /// Without an id the newest checkpoint is used. No checkpoint means the run
    /// starts fresh. A checkpoint written for other endpoints or another
    /// descriptor is refused.
    pub fn resume(mut self, migration_id: Option<&str>) -> Result<Self> {
        let checkpoint = match migration_id {
            Some(id) => self.store.load(id)?,
            None => self.store.latest()?,
        };

        match checkpoint {
            Some(checkpoint) => {
                checkpoint
                    .validate_config(&self.config.hash(), &self.descriptor.fingerprint())?;
                info!(
                    "Resuming migration {} ({} tables already migrated)",
                    checkpoint.migration_id,
                    checkpoint.tables_migrated.len()
                );
                self.migration_id = checkpoint.migration_id.clone();
                self.checkpoint = Some(checkpoint);
            }
            None => {
                if let Some(id) = migration_id {
                    self.migration_id = id.to_string();
                }
                info!("No checkpoint found, starting fresh as {}", self.migration_id);
            }
        }
        Ok(self)
    }

    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub fn phase(&self) -> MigrationPhase {
        self.tracker.current()
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn source(&self) -> &Connection {
        &self.source
    }

    pub fn target(&self) -> &Connection {
        &self.target
    }

    /// Run every phase and return the run report.
    ///
    /// Phase failures are reported in the returned [`MigrationReport`]; an
    /// `Err` means the run could not start (for example, the lock is held).
    pub async fn run(mut self) -> Result<MigrationReport> {
        let _lock = self.store.lock(&self.migration_id)?;
        let mut report = MigrationReport::new(&self.migration_id);
        info!("Starting migration run: {}", self.migration_id);

        match self.run_phases(&mut report).await {
            Ok(()) => report.exit_code = 0,
            Err(e) => self.handle_failure(&mut report, e).await,
        }

        report.final_phase = self.tracker.current();
        report.finalize();
        info!(
            "Migration {} finished in phase {}: {} records migrated, {} failed in {:.1}s",
            report.migration_id,
            report.final_phase,
            report.summary.total_records_migrated,
            report.summary.total_records_failed,
            report.summary.duration_seconds
        );

        self.close().await;
        Ok(report)
    }

    async fn run_phases(&mut self, report: &mut MigrationReport) -> Result<()> {
        // Phase 1: Pre-migration validation
        self.tracker.transition(MigrationPhase::PreValidating)?;
        info!("Phase 1: Pre-migration validation");
        let pre = self.pre_validate(false).await?;
        let failed = pre.status == ReportStatus::Error;
        let issues = pre.issues.join("; ");
        report.phases.pre_validation = Some(pre);
        if failed {
            return Err(MigrateError::Validation(format!(
                "pre-validation failed: {}",
                issues
            )));
        }

        // Phase 2: Prepare target database
        self.tracker.transition(MigrationPhase::PreparingTarget)?;
        info!("Phase 2: Preparing target database");
        let prep = self.prepare_target().await?;
        let failed = prep.status == ReportStatus::Error;
        let mut problems = prep.schema.errors.clone();
        problems.extend(prep.verification.missing_tables.iter().map(|t| format!("missing table {}", t)));
        report.phases.target_preparation = Some(prep);
        if failed {
            return Err(MigrateError::Schema(format!(
                "target schema preparation failed: {}",
                problems.join("; ")
            )));
        }

        // Phase 3: Data migration
        self.tracker.transition(MigrationPhase::Migrating)?;
        info!("Phase 3: Migrating data");
        let mut checkpoint = self.checkpoint.take().unwrap_or_else(|| {
            MigrationCheckpoint::new(
                self.migration_id.clone(),
                self.config.hash(),
                self.descriptor.fingerprint(),
            )
        });
        self.store.save(&mut checkpoint)?;

        let mut data = DataMigrationReport::default();
        let result = self.migrate_tables(&mut checkpoint, &mut data).await;
        data.absorb(&checkpoint);
        if let Err(e) = &result {
            data.errors.push(e.to_string());
        }
        if data.records_failed > 0 {
            report.status = report.status.max(ReportStatus::Warning);
        }
        report.phases.data_migration = Some(data);
        result?;

        // Phase 4: Post-migration validation (optional)
        if self.config.migration.post_validation {
            self.tracker.transition(MigrationPhase::PostValidating)?;
            info!("Phase 4: Post-migration validation");
            let post = self.post_validate().await?;
            match post.status {
                ReportStatus::Error => {
                    let issues = post.issues.join("; ");
                    report.phases.post_validation = Some(post);
                    return Err(MigrateError::Validation(format!(
                        "post-validation failed: {}",
                        issues
                    )));
                }
                ReportStatus::Warning => {
                    warn!("Migration completed with warnings");
                    report.status = report.status.max(ReportStatus::Warning);
                }
                ReportStatus::Success => {}
            }
            report.phases.post_validation = Some(post);
        } else {
            info!("Skipping post-migration validation");
        }

        // Phase 5: Cleanup
        self.tracker.transition(MigrationPhase::Completed)?;
        self.store.delete(&self.migration_id)?;
        info!(
            "Migration completed successfully: {} records migrated",
            checkpoint.records_migrated
        );
        Ok(())
    }

    async fn handle_failure(&mut self, report: &mut MigrationReport, err: MigrateError) {
        let phase = self.tracker.current();
        error!("Migration failed during {}: {}", phase, err);

        report.status = ReportStatus::Error;
        report.error = Some(err.to_string());
        report.exit_code = err.exit_code();

        if let Err(e) = self.tracker.transition(MigrationPhase::Failed) {
            error!("{}", e);
            return;
        }

        if !self.decider.confirm_rollback(phase, &err) {
            info!("Rollback declined; checkpoint {} kept for resume", self.migration_id);
            return;
        }

        if self.tracker.transition(MigrationPhase::RollingBack).is_err() {
            return;
        }
        let rollback = self.rollback().await;
        let next = if rollback.success {
            MigrationPhase::RolledBack
        } else {
            MigrationPhase::Failed
        };
        if let Err(e) = self.tracker.transition(next) {
            error!("{}", e);
        }
        report.rollback = Some(rollback);
    }

    /// Gather statistics and check the target schema.
    ///
    /// With `only` set (standalone validation) an incompatible target schema
    /// is an error; during a run the tables are created in the next phase.
    pub async fn pre_validate(&self, only: bool) -> Result<ValidationReport> {
        info!("Starting pre-migration validation...");
        let mut reporter = ValidationReporter::new();

        let source_stats = DatabaseStats::collect(&self.source).await?;
        info!("Source database: {} total records", source_stats.total_records);
        let target_stats = DatabaseStats::collect(&self.target).await?;
        info!("Target database: {} total records", target_stats.total_records);

        let verification = self
            .schema_manager
            .verify_schema(&self.target, &self.descriptor)
            .await?;

        if !verification.missing_tables.is_empty() {
            let message = format!("Missing tables in target: {:?}", verification.missing_tables);
            if only {
                reporter.fail(message);
            } else {
                reporter.issue(message);
            }
        }
        if !verification.missing_columns.is_empty() {
            let message = format!("Missing columns: {:?}", verification.missing_columns);
            if only {
                reporter.fail(message);
            } else {
                reporter.warning(message);
            }
        }
        for (column, mismatch) in &verification.type_mismatches {
            reporter.warning(format!("Type mismatch on {}: {}", column, mismatch));
        }

        let declared: HashSet<&str> = self
            .descriptor
            .tables
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        for table in source_stats.tables.keys() {
            if !declared.contains(table.as_str()) {
                reporter.warning(format!(
                    "Source table {} is not in the schema descriptor and will not be migrated",
                    table
                ));
            }
        }
        for table in &self.descriptor.tables {
            if !source_stats.tables.contains_key(&table.name) {
                reporter.warning(format!("Table {} not found in source", table.name));
            }
        }

        if target_stats.total_records > 0 {
            reporter.warning(format!(
                "Target database contains {} records",
                target_stats.total_records
            ));
        }

        reporter
            .source_stats(source_stats)
            .target_stats(target_stats)
            .schema_compatibility(verification);
        Ok(reporter.finish())
    }

    /// Create or upgrade the target schema, then verify it.
    pub async fn prepare_target(&self) -> Result<PreparationReport> {
        info!("Preparing target database...");
        let schema = self
            .schema_manager
            .ensure_schema(&self.target, &self.descriptor)
            .await?;
        let verification = self
            .schema_manager
            .verify_schema(&self.target, &self.descriptor)
            .await?;

        let status = if !schema.is_success() || !verification.compatible {
            ReportStatus::Error
        } else if !schema.warnings.is_empty() {
            ReportStatus::Warning
        } else {
            ReportStatus::Success
        };
        if status != ReportStatus::Error {
            info!("Target database prepared successfully");
        }
        Ok(PreparationReport {
            status,
            schema,
            verification,
        })
    }

    /// Tables in migration order.
    ///
    /// `migration.table_order` comes first; every other descriptor table
    /// follows with parents before children.
    pub fn migration_order(&self) -> Result<Vec<&TableSpec>> {
        let mut ordered: Vec<&TableSpec> = Vec::with_capacity(self.descriptor.tables.len());
        let mut seen = HashSet::new();

        for name in &self.config.migration.table_order {
            match self.descriptor.table(name) {
                Some(table) if seen.insert(table.name.as_str()) => ordered.push(table),
                Some(_) => {}
                None => warn!("table_order names unknown table {}", name),
            }
        }
        for table in self.descriptor.dependency_order()? {
            if seen.insert(table.name.as_str()) {
                ordered.push(table);
            }
        }

        for (pos, table) in ordered.iter().enumerate() {
            for parent in table.depends_on() {
                if ordered[pos + 1..].iter().any(|t| t.name == parent) {
                    warn!(
                        "{} is migrated before its parent {}; foreign key errors may follow",
                        table.name, parent
                    );
                }
            }
        }
        Ok(ordered)
    }

    /// Transfer every table not yet recorded in `checkpoint`.
    ///
    /// The checkpoint is saved after each table, before the next one starts.
    pub async fn migrate_tables(
        &self,
        checkpoint: &mut MigrationCheckpoint,
        data: &mut DataMigrationReport,
    ) -> Result<()> {
        let source_schema = self.source.introspect().await?;
        let batch_size = self.config.migration.batch_size;

        for spec in self.migration_order()? {
            if checkpoint.is_table_completed(&spec.name) {
                info!("{}: already migrated, skipping", spec.name);
                data.tables_resumed.push(spec.name.clone());
                continue;
            }

            let Some(source_table) = source_schema.table(&spec.name) else {
                warn!("{}: not found in source, nothing to migrate", spec.name);
                data.warnings
                    .push(format!("Table {} not found in source", spec.name));
                checkpoint.record_table(&spec.name, TableResult::empty());
                self.store.save(checkpoint)?;
                continue;
            };

            let plan = TablePlan::build(spec, Some(source_table))?;
            if !plan.skipped_columns.is_empty() {
                data.warnings.push(format!(
                    "Source table {} lacks columns {:?}",
                    spec.name, plan.skipped_columns
                ));
            }

            let mut result =
                match transfer_table(&self.source, &self.target, &plan, batch_size).await {
                    Ok(result) => result,
                    Err(aborted) => {
                        data.failed_tables.insert(spec.name.clone(), aborted.partial);
                        return Err(aborted.error);
                    }
                };

            if let Some(max) = self.config.migration.max_record_failure_percent {
                let pct = result.failure_percent();
                if pct > max {
                    // left out of the checkpoint so a resume transfers it again
                    result.completed_at = None;
                    data.failed_tables.insert(spec.name.clone(), result);
                    return Err(MigrateError::transfer(
                        &spec.name,
                        format!(
                            "{:.2}% of records failed, above the {}% limit",
                            pct, max
                        ),
                    ));
                }
            }

            if let Err(e) = self.target.reset_sequences(spec).await {
                warn!("{}: failed to reset sequences: {}", spec.name, e);
                data.warnings
                    .push(format!("Sequence reset failed for {}: {}", spec.name, e));
            }

            checkpoint.record_table(&spec.name, result);
            self.store.save(checkpoint)?;
        }

        data.absorb(checkpoint);
        Ok(())
    }

    /// Compare row counts and hash-check a sample of records.
    pub async fn post_validate(&self) -> Result<ValidationReport> {
        info!("Starting post-migration validation...");
        let mut reporter = ValidationReporter::new();
        let settings = &self.config.migration;

        let source_stats = DatabaseStats::collect(&self.source).await?;
        let target_stats = DatabaseStats::collect(&self.target).await?;

        let loss = data_loss(
            &source_stats.tables,
            &target_stats.tables,
            settings.max_data_loss_percent,
        );
        if loss.exceeded {
            reporter.escalate(ReportStatus::Warning).issue(format!(
                "Data loss {:.2}% exceeds threshold {}%",
                loss.loss_percentage, settings.max_data_loss_percent
            ));
        }

        let plans = self.sample_plans(&source_stats, &target_stats, &mut reporter).await?;
        let sample = sample_validate(
            &self.source,
            &self.target,
            &plans,
            settings.validation_sample_size,
        )
        .await;
        if sample.mismatches > 0 {
            reporter
                .escalate(ReportStatus::Warning)
                .issue(format!("Found {} data mismatches in sample", sample.mismatches));
        }
        for e in &sample.errors {
            reporter.warning(e.clone());
        }

        reporter
            .source_stats(source_stats)
            .target_stats(target_stats)
            .data_integrity(loss)
            .sample_validation(sample);
        Ok(reporter.finish())
    }

    /// Plans for the tables to sample: `migration.sample_tables`, or every
    /// descriptor table present on both sides.
    async fn sample_plans(
        &self,
        source_stats: &DatabaseStats,
        target_stats: &DatabaseStats,
        reporter: &mut ValidationReporter,
    ) -> Result<Vec<TablePlan>> {
        let source_schema = self.source.introspect().await?;
        let names: Vec<String> = if self.config.migration.sample_tables.is_empty() {
            self.descriptor
                .dependency_order()?
                .into_iter()
                .map(|t| t.name.clone())
                .collect()
        } else {
            self.config.migration.sample_tables.clone()
        };

        let mut plans = Vec::with_capacity(names.len());
        for name in names {
            let (Some(spec), Some(source_table)) =
                (self.descriptor.table(&name), source_schema.table(&name))
            else {
                reporter.warning(format!("Sample table {} not found in descriptor or source", name));
                continue;
            };
            if !target_stats.tables.contains_key(&name) {
                reporter.warning(format!("Sample table {} not found in target", name));
                continue;
            }
            if !source_stats.tables.contains_key(&name) {
                continue;
            }
            plans.push(TablePlan::build(spec, Some(source_table))?);
        }
        Ok(plans)
    }

    /// Clear every target table and delete the checkpoint.
    pub async fn rollback(&self) -> RollbackReport {
        let mut report = rollback_target(&self.target, Some(&self.descriptor)).await;
        if report.success {
            if let Err(e) = self.store.delete(&self.migration_id) {
                report.errors.push(format!("delete checkpoint: {}", e));
                report.success = false;
            }
        }
        report
    }

    /// Close both connection pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }
}
