//! Schema management: connect, create or upgrade, and verify a database
//! against a [`SchemaDescriptor`].
//!
//! Creation is additive only. Missing tables, columns and indexes are added;
//! existing columns are never dropped or narrowed.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::schema::{SchemaDescriptor, TableSpec};
use crate::core::traits::{check_type_map, DialectAdapter, SourceReader, TargetWriter};
use crate::drivers::{redact_dsn, Connection, DialectImpl};
use crate::error::{MigrateError, Result};

/// Result of comparing a live database with a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaVerification {
    /// False when any descriptor table or column is absent.
    pub compatible: bool,
    pub missing_tables: Vec<String>,
    /// Missing columns per existing table.
    pub missing_columns: BTreeMap<String, Vec<String>>,
    /// `table.column` -> `expected X, found Y`. Warnings only.
    pub type_mismatches: BTreeMap<String, String>,
    /// Live tables the descriptor does not declare.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_tables: Vec<String>,
}

/// What [`SchemaManager::ensure_schema`] changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnsureReport {
    pub tables_created: Vec<String>,
    pub columns_added: BTreeMap<String, Vec<String>>,
    pub indexes_created: Vec<String>,
    /// DDL failures. The affected table was skipped.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl EnsureReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn changed(&self) -> bool {
        !self.tables_created.is_empty() || !self.columns_added.is_empty()
    }
}

/// Connects to databases and keeps their schema in line with a descriptor.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    max_connections: usize,
    backup_sqlite: bool,
}

impl Default for SchemaManager {
    fn default() -> Self {
        Self::new(4)
    }
}

impl SchemaManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections: max_connections.max(1),
            backup_sqlite: true,
        }
    }

    /// Copy an existing SQLite file before its schema is changed.
    pub fn with_sqlite_backup(mut self, enabled: bool) -> Self {
        self.backup_sqlite = enabled;
        self
    }

    /// Connect to the database named by `dsn`.
    ///
    /// The dialect comes from the URL scheme; its type map is checked before
    /// the connection is handed out.
    pub async fn connect(&self, dsn: &str) -> Result<Connection> {
        let conn = Connection::connect(dsn, self.max_connections).await?;
        check_type_map(&conn.dialect())?;
        info!("Connected to {} ({})", redact_dsn(dsn), conn.kind());
        Ok(conn)
    }

    /// Create missing tables, columns and indexes.
    ///
    /// Safe to run repeatedly. A failing statement skips the rest of its table
    /// and is recorded in the report; index failures are warnings.
    pub async fn ensure_schema(
        &self,
        conn: &Connection,
        descriptor: &SchemaDescriptor,
    ) -> Result<EnsureReport> {
        let dialect = conn.dialect();
        let live = conn.introspect().await?;
        let verification = compare_schemas(descriptor, &live);
        let mut report = EnsureReport::default();

        if !verification.compatible && self.backup_sqlite && !live.tables.is_empty() {
            if let Some(path) = conn.sqlite_path() {
                let backup = backup_sqlite_file(path)?;
                info!("Backed up {} to {}", path.display(), backup.display());
                report.backup = Some(backup);
            }
        }

        for table in descriptor.dependency_order()? {
            match live.table(&table.name) {
                None => {
                    let ddl = dialect.render_create_table(table)?;
                    if let Err(e) = conn.execute(&ddl).await {
                        warn!("Failed to create table {}: {}", table.name, e);
                        report
                            .errors
                            .push(format!("create table {}: {}", table.name, e));
                        continue;
                    }
                    debug!("Created table {}", table.name);
                    report.tables_created.push(table.name.clone());
                }
                Some(existing) => {
                    if let Err(e) = self
                        .add_missing_columns(conn, &dialect, table, existing, &mut report)
                        .await
                    {
                        report.errors.push(e);
                        continue;
                    }
                }
            }

            for index in &table.indexes {
                let ddl = dialect.render_create_index(&table.name, index);
                match conn.execute(&ddl).await {
                    Ok(_) => report.indexes_created.push(index.name.clone()),
                    Err(e) => {
                        warn!("Failed to create index {}: {}", index.name, e);
                        report
                            .warnings
                            .push(format!("create index {}: {}", index.name, e));
                    }
                }
            }
        }

        info!(
            "Schema ensured: {} tables created, {} tables altered, {} errors",
            report.tables_created.len(),
            report.columns_added.len(),
            report.errors.len()
        );
        Ok(report)
    }

    async fn add_missing_columns(
        &self,
        conn: &Connection,
        dialect: &DialectImpl,
        table: &TableSpec,
        existing: &TableSpec,
        report: &mut EnsureReport,
    ) -> std::result::Result<(), String> {
        for column in &table.columns {
            if existing.column(&column.name).is_some() {
                continue;
            }

            let mut column = column.clone();
            if !column.nullable && column.default.is_none() {
                column.nullable = true;
                report.warnings.push(format!(
                    "column {}.{} is NOT NULL without a default; added as nullable",
                    table.name, column.name
                ));
            }
            let omitted = dialect.add_column_omissions(&column);
            if !omitted.is_empty() {
                warn!(
                    "{}.{}: added without {}",
                    table.name,
                    column.name,
                    omitted.join(", ")
                );
                report.warnings.push(format!(
                    "column {}.{} added without {}",
                    table.name,
                    column.name,
                    omitted.join(", ")
                ));
            }

            let ddl = dialect
                .render_add_column(&table.name, &column)
                .map_err(|e| format!("add column {}.{}: {}", table.name, column.name, e))?;
            conn.execute(&ddl)
                .await
                .map_err(|e| format!("add column {}.{}: {}", table.name, column.name, e))?;

            info!("Added column {}.{}", table.name, column.name);
            report
                .columns_added
                .entry(table.name.clone())
                .or_default()
                .push(column.name.clone());
        }
        Ok(())
    }

    /// Compare the live schema of `conn` with `descriptor`.
    pub async fn verify_schema(
        &self,
        conn: &Connection,
        descriptor: &SchemaDescriptor,
    ) -> Result<SchemaVerification> {
        let live = conn.introspect().await?;
        Ok(compare_schemas(descriptor, &live))
    }
}

/// Pure comparison of an expected descriptor with an introspected one.
pub fn compare_schemas(expected: &SchemaDescriptor, live: &SchemaDescriptor) -> SchemaVerification {
    let mut result = SchemaVerification::default();

    for table in &expected.tables {
        let Some(live_table) = live.table(&table.name) else {
            result.missing_tables.push(table.name.clone());
            continue;
        };

        let mut missing = Vec::new();
        for column in &table.columns {
            match live_table.column(&column.name) {
                None => missing.push(column.name.clone()),
                Some(found) if found.logical_type != column.logical_type => {
                    result.type_mismatches.insert(
                        format!("{}.{}", table.name, column.name),
                        format!("expected {}, found {}", column.logical_type, found.logical_type),
                    );
                }
                Some(_) => {}
            }
        }
        if !missing.is_empty() {
            result.missing_columns.insert(table.name.clone(), missing);
        }
    }

    let declared: HashSet<&str> = expected.tables.iter().map(|t| t.name.as_str()).collect();
    result.extra_tables = live
        .tables
        .iter()
        .filter(|t| !declared.contains(t.name.as_str()))
        .map(|t| t.name.clone())
        .collect();

    result.compatible = result.missing_tables.is_empty() && result.missing_columns.is_empty();
    result
}

/// Copy a SQLite database file to `<path>.backup_<timestamp>`.
pub fn backup_sqlite_file(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(MigrateError::Schema(format!(
            "cannot back up {}: not a file",
            path.display()
        )));
    }
    let mut backup = path.as_os_str().to_os_string();
    backup.push(format!(".backup_{}", Local::now().format("%Y%m%d_%H%M%S")));
    let backup = PathBuf::from(backup);
    std::fs::copy(path, &backup)?;
    Ok(backup)
}
