//! # lite-pg-migrate
//!
//! Resumable migration of relational data between SQLite and PostgreSQL, in
//! either direction.
//!
//! The library provides:
//!
//! - **Schema descriptors** declared once and rendered for either dialect
//! - **Schema management** that creates or upgrades the target idempotently
//! - **Batched keyset upserts** with per-record failure capture
//! - **Checkpoints** written atomically after every table, for resume
//! - **Validation** by row-count loss and sampled record hashes
//! - **Operator-gated rollback** of a failed run
//!
//! ## Example
//!
//! ```rust,no_run
//! use lite_pg_migrate::{Config, MigrationManager, SchemaDescriptor};
//!
//! # async fn example() -> lite_pg_migrate::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let descriptor = SchemaDescriptor::load("schema.yaml")?;
//! let manager = MigrationManager::connect(config, descriptor).await?;
//! let report = manager.resume(None)?.run().await?;
//! println!("Migrated {} records", report.summary.total_records_migrated);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod schema;
pub mod state;
pub mod transfer;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, EndpointConfig, MigrationConfig};
pub use core::{
    ColumnSpec, DialectAdapter, LogicalType, Row, SchemaDescriptor, SourceReader, SqlValue,
    TableSpec, TargetWriter,
};
pub use drivers::{Connection, Dialect};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    AlwaysRollback, HealthCheckResult, MigrationManager, MigrationPhase, NeverRollback,
    RollbackDecider,
};
pub use report::{MigrationReport, ReportStatus, ValidationReport};
pub use schema::{EnsureReport, SchemaManager, SchemaVerification};
pub use state::{CheckpointStore, FileCheckpointStore, MigrationCheckpoint, TableResult};
pub use transfer::{TablePlan, TransferAborted};
pub use verify::{DataLossReport, SampleValidation};
