//! Batched table transfer with per-record error capture.
//!
//! One table at a time, one batch at a time: read a keyset page from the
//! source, conform every value to the destination column's logical type, and
//! upsert the page into the target. Rows that fail conversion or are rejected
//! by the target become [`RecordError`]s; the batch and the table carry on.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::schema::{LogicalType, TableSpec};
use crate::core::traits::{BatchCursor, RecordError, SourceReader, TargetWriter};
use crate::core::value::{describe_key, Row, SqlValue};
use crate::error::{MigrateError, Result};
use crate::state::TableResult;

/// Columns and types to move for one table.
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: String,
    /// Columns read from the source and written to the target, in order.
    pub columns: Vec<String>,
    pub pk_columns: Vec<String>,
    /// Logical type of each column in `columns`.
    pub column_types: Vec<LogicalType>,
    /// Descriptor columns the source lacks; target defaults apply.
    pub skipped_columns: Vec<String>,
}

impl TablePlan {
    /// Plan a table from its declaration and, when known, the source's
    /// introspected version of it.
    ///
    /// Columns the source does not have are skipped. Key columns must exist.
    pub fn build(spec: &TableSpec, source: Option<&TableSpec>) -> Result<Self> {
        if spec.primary_key.is_empty() {
            return Err(MigrateError::NoPrimaryKey(spec.name.clone()));
        }

        let mut columns = Vec::with_capacity(spec.columns.len());
        let mut column_types = Vec::with_capacity(spec.columns.len());
        let mut skipped_columns = Vec::new();

        for column in &spec.columns {
            let present = source.map_or(true, |s| s.column(&column.name).is_some());
            if present {
                columns.push(column.name.clone());
                column_types.push(column.logical_type);
            } else if spec.primary_key.contains(&column.name) {
                return Err(MigrateError::Schema(format!(
                    "source table '{}' lacks key column '{}'",
                    spec.name, column.name
                )));
            } else {
                skipped_columns.push(column.name.clone());
            }
        }

        Ok(Self {
            table: spec.name.clone(),
            columns,
            pk_columns: spec.primary_key.clone(),
            column_types,
            skipped_columns,
        })
    }

    /// Conform a source row to the planned column types.
    pub fn conform_row(&self, row: Row) -> std::result::Result<Row, String> {
        row.into_iter()
            .zip(&self.column_types)
            .zip(&self.columns)
            .map(|((value, ty), name)| {
                value
                    .conform(*ty)
                    .map_err(|e| format!("column {}: {}", name, e))
            })
            .collect()
    }
}

/// Counters gathered while a table is transferred.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub rows_read: u64,
    pub records_migrated: u64,
    pub records_failed: u64,
    pub batches: u64,
    pub read_time: Duration,
    pub write_time: Duration,
    pub errors: Vec<RecordError>,
}

impl TransferStats {
    fn into_result(self, completed: bool) -> TableResult {
        TableResult {
            records_migrated: self.records_migrated,
            records_failed: self.records_failed,
            errors: self.errors,
            completed_at: completed.then(Utc::now),
        }
    }
}

/// A table transfer that stopped partway.
#[derive(Debug)]
pub struct TransferAborted {
    /// Rows written and records rejected before the failure. Not completed.
    pub partial: TableResult,
    pub error: MigrateError,
}

impl From<TransferAborted> for MigrateError {
    fn from(aborted: TransferAborted) -> Self {
        aborted.error
    }
}

/// Move every row of one table from `source` to `target`.
///
/// Read or connection failures abort the table; the error comes back with
/// whatever had been transferred so far. Record-level failures are collected
/// into the returned [`TableResult`].
pub async fn transfer_table(
    source: &dyn SourceReader,
    target: &dyn TargetWriter,
    plan: &TablePlan,
    batch_size: usize,
) -> std::result::Result<TableResult, TransferAborted> {
    let started = Instant::now();
    let mut stats = TransferStats::default();

    if !plan.skipped_columns.is_empty() {
        warn!(
            "{}: source lacks columns {:?}; target defaults apply",
            plan.table, plan.skipped_columns
        );
    }

    if let Err(error) = copy_batches(source, target, plan, batch_size, &mut stats).await {
        warn!(
            "{}: aborted after {} rows ({} failed): {}",
            plan.table, stats.records_migrated, stats.records_failed, error
        );
        return Err(TransferAborted {
            partial: stats.into_result(false),
            error,
        });
    }

    info!(
        "{}: migrated {} rows ({} failed) in {} batches, {:.2}s (read {:.2}s, write {:.2}s)",
        plan.table,
        stats.records_migrated,
        stats.records_failed,
        stats.batches,
        started.elapsed().as_secs_f64(),
        stats.read_time.as_secs_f64(),
        stats.write_time.as_secs_f64()
    );
    Ok(stats.into_result(true))
}

async fn copy_batches(
    source: &dyn SourceReader,
    target: &dyn TargetWriter,
    plan: &TablePlan,
    batch_size: usize,
    stats: &mut TransferStats,
) -> Result<()> {
    let mut cursor = BatchCursor::new(
        plan.table.clone(),
        plan.columns.clone(),
        plan.pk_columns.clone(),
        batch_size,
    )?;

    while !cursor.is_exhausted() {
        let read_start = Instant::now();
        let rows = source.read_batch(cursor.options()).await?;
        stats.read_time += read_start.elapsed();
        cursor.advance(&rows);

        if rows.is_empty() {
            break;
        }
        stats.batches += 1;
        stats.rows_read += rows.len() as u64;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let key = cursor.key_of(&row);
            match plan.conform_row(row) {
                Ok(conformed) => batch.push(conformed),
                Err(message) => {
                    stats.records_failed += 1;
                    stats.errors.push(record_error(&plan.pk_columns, &key, message));
                }
            }
        }

        let write_start = Instant::now();
        let outcome = target
            .upsert_batch(&plan.table, &plan.columns, &plan.pk_columns, batch)
            .await?;
        stats.write_time += write_start.elapsed();

        stats.records_migrated += outcome.written;
        stats.records_failed += outcome.failures.len() as u64;
        stats.errors.extend(outcome.failures);

        debug!(
            "{}: batch {} done, {} rows so far",
            plan.table, stats.batches, stats.records_migrated
        );
    }
    Ok(())
}

fn record_error(pk_columns: &[String], key: &[SqlValue], message: String) -> RecordError {
    RecordError {
        key: describe_key(pk_columns, key),
        message,
    }
}
