//! Core traits for dialect-agnostic migration.
//!
//! - [`DialectAdapter`]: renders a [`SchemaDescriptor`] into DDL/DML for one backend
//! - [`SourceReader`]: introspects a database and reads rows with keyset pagination
//! - [`TargetWriter`]: applies DDL and upserts rows, reporting per-record failures
//!
//! Both drivers implement the reader and the writer, since either backend can
//! sit on either side of a migration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

use super::schema::{ColumnSpec, DefaultValue, IndexSpec, LogicalType, SchemaDescriptor, TableSpec};
use super::value::{Row, SqlValue};

/// Options for reading one batch of rows from a table.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Table name.
    pub table: String,
    /// Columns to read, in output order.
    pub columns: Vec<String>,
    /// Primary key columns used for ordering and the keyset cursor.
    pub pk_columns: Vec<String>,
    /// Key of the last row already read (exclusive lower bound).
    pub after: Option<Vec<SqlValue>>,
    /// Maximum number of rows to return.
    pub limit: usize,
}

/// Keyset cursor over one table, advanced one batch at a time.
#[derive(Debug, Clone)]
pub struct BatchCursor {
    opts: ReadOptions,
    pk_idx: Vec<usize>,
    exhausted: bool,
}

impl BatchCursor {
    /// Cursor positioned before the first row. Every key column must be read.
    pub fn new(
        table: impl Into<String>,
        columns: Vec<String>,
        pk_columns: Vec<String>,
        batch_size: usize,
    ) -> Result<Self> {
        let table = table.into();
        if pk_columns.is_empty() {
            return Err(MigrateError::NoPrimaryKey(table));
        }
        let pk_idx = pk_columns
            .iter()
            .map(|pk| {
                columns.iter().position(|c| c == pk).ok_or_else(|| {
                    MigrateError::Schema(format!(
                        "key column '{}' of table '{}' is not selected",
                        pk, table
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            opts: ReadOptions {
                table,
                columns,
                pk_columns,
                after: None,
                limit: batch_size.max(1),
            },
            pk_idx,
            exhausted: false,
        })
    }

    /// Options for the next read.
    pub fn options(&self) -> &ReadOptions {
        &self.opts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Move past a batch that was just read. A short batch ends the scan.
    pub fn advance(&mut self, rows: &[Row]) {
        if let Some(last) = rows.last() {
            self.opts.after = Some(self.pk_idx.iter().map(|&i| last[i].clone()).collect());
        }
        if rows.len() < self.opts.limit {
            self.exhausted = true;
        }
    }

    /// Key values of a row, in primary key order.
    pub fn key_of(&self, row: &[SqlValue]) -> Vec<SqlValue> {
        self.pk_idx.iter().map(|&i| row[i].clone()).collect()
    }
}

/// A single row that could not be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    /// Rendered primary key, e.g. `id=42`.
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.key, self.message)
    }
}

/// Result of upserting one batch.
#[derive(Debug, Clone, Default)]
pub struct UpsertOutcome {
    /// Rows written successfully.
    pub written: u64,
    /// Rows rejected individually; the rest of the batch was kept.
    pub failures: Vec<RecordError>,
}

/// SQL syntax and type-mapping strategy for one backend.
///
/// Type mapping is table-driven: [`type_map`](Self::type_map) lists the
/// native type for every [`LogicalType`], and [`check_type_map`] rejects an
/// adapter whose table is incomplete before any DDL is rendered.
pub trait DialectAdapter: Send + Sync {
    /// Dialect name (`sqlite` or `postgres`).
    fn name(&self) -> &'static str;

    /// Quote an identifier.
    fn quote_ident(&self, name: &str) -> String;

    /// Fully qualified, quoted table reference.
    fn qualify_table(&self, table: &str) -> String {
        self.quote_ident(table)
    }

    /// Positional parameter placeholder (1-based).
    fn param_placeholder(&self, index: usize) -> String;

    /// Native column type for each logical type.
    fn type_map(&self) -> &'static [(LogicalType, &'static str)];

    /// Map an introspected native type back to a logical type.
    fn logical_type(&self, native: &str) -> Option<LogicalType>;

    /// Native type for a logical type.
    fn native_type(&self, logical: LogicalType) -> Result<&'static str> {
        self.type_map()
            .iter()
            .find(|(l, _)| *l == logical)
            .map(|(_, native)| *native)
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "{} dialect has no mapping for logical type {}",
                    self.name(),
                    logical
                ))
            })
    }

    /// Render a column default as a SQL literal.
    fn render_default(&self, default: &DefaultValue) -> String;

    /// Column definition for a database-generated integer key.
    fn render_auto_increment_column(&self, column: &ColumnSpec) -> String;

    /// True when the primary key is declared inline on the column rather
    /// than as a table constraint.
    fn inline_primary_key(&self, _table: &TableSpec) -> bool {
        false
    }

    /// Render one column definition (used by CREATE TABLE and ADD COLUMN).
    fn render_column(&self, column: &ColumnSpec) -> Result<String> {
        if column.auto_increment {
            return Ok(self.render_auto_increment_column(column));
        }

        let mut def = format!(
            "{} {}",
            self.quote_ident(&column.name),
            self.native_type(column.logical_type)?
        );
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(&self.render_default(default));
        }
        if column.unique {
            def.push_str(" UNIQUE");
        }
        Ok(def)
    }

    /// `CREATE TABLE IF NOT EXISTS` for a table, including keys and FKs.
    fn render_create_table(&self, table: &TableSpec) -> Result<String> {
        let mut parts = Vec::with_capacity(table.columns.len() + 2);
        for column in &table.columns {
            parts.push(format!("    {}", self.render_column(column)?));
        }

        if !self.inline_primary_key(table) {
            let pk = table
                .primary_key
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("    PRIMARY KEY ({})", pk));
        }

        for fk in &table.foreign_keys {
            let local = fk
                .columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let remote = fk
                .references_columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!(
                "    FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                local,
                self.qualify_table(&fk.references_table),
                remote,
                fk.on_delete.as_sql()
            ));
        }

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.qualify_table(&table.name),
            parts.join(",\n")
        ))
    }

    /// `ALTER TABLE ... ADD COLUMN` for a column missing from an existing table.
    fn render_add_column(&self, table: &str, column: &ColumnSpec) -> Result<String>;

    /// Parts of `column` that [`render_add_column`](Self::render_add_column)
    /// leaves out.
    fn add_column_omissions(&self, _column: &ColumnSpec) -> Vec<&'static str> {
        Vec::new()
    }

    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS`.
    fn render_create_index(&self, table: &str, index: &IndexSpec) -> String {
        let cols = index
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_ident(&index.name),
            self.qualify_table(table),
            cols
        )
    }

    /// All DDL for a descriptor, parents before children.
    fn render(&self, descriptor: &SchemaDescriptor) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        for table in descriptor.dependency_order()? {
            statements.push(self.render_create_table(table)?);
            for index in &table.indexes {
                statements.push(self.render_create_index(&table.name, index));
            }
        }
        Ok(statements)
    }

    /// Keyset-paginated SELECT ordered by primary key.
    fn build_select_query(&self, opts: &ReadOptions) -> String {
        let cols = opts
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", cols, self.qualify_table(&opts.table));

        if opts.after.is_some() && !opts.pk_columns.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.build_keyset_where(&opts.pk_columns));
        }

        if !opts.pk_columns.is_empty() {
            let order = opts
                .pk_columns
                .iter()
                .map(|c| self.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        if opts.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", opts.limit));
        }

        sql
    }

    /// Keyset predicate `pk > $1` or `(a, b) > ($1, $2)`.
    fn build_keyset_where(&self, pk_columns: &[String]) -> String {
        if pk_columns.len() == 1 {
            return format!(
                "{} > {}",
                self.quote_ident(&pk_columns[0]),
                self.param_placeholder(1)
            );
        }
        let cols = pk_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let params = (1..=pk_columns.len())
            .map(|i| self.param_placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        format!("({}) > ({})", cols, params)
    }

    /// Single-row INSERT with conflict handling on the primary key.
    fn build_upsert_query(&self, table: &str, columns: &[String], pk_columns: &[String]) -> String {
        let quoted_cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let params = (1..=columns.len())
            .map(|i| self.param_placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict_cols = pk_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO",
            self.qualify_table(table),
            quoted_cols,
            params,
            conflict_cols
        );

        let update_set = columns
            .iter()
            .filter(|c| !pk_columns.contains(c))
            .map(|c| format!("{} = excluded.{}", self.quote_ident(c), self.quote_ident(c)))
            .collect::<Vec<_>>();

        if update_set.is_empty() {
            sql.push_str(" NOTHING");
        } else {
            sql.push_str(&format!(" UPDATE SET {}", update_set.join(", ")));
        }

        sql
    }

    /// SELECT one row by primary key.
    fn build_fetch_by_key_query(&self, table: &str, columns: &[String], pk_columns: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = pk_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = {}", self.quote_ident(c), self.param_placeholder(i + 1)))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            "SELECT {} FROM {} WHERE {}",
            cols,
            self.qualify_table(table),
            predicate
        )
    }

    /// Row count query.
    fn build_count_query(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.qualify_table(table))
    }

    /// Statement that removes every row from a table.
    fn build_clear_table(&self, table: &str) -> String;
}

/// Fail fast when a dialect's type map is missing a logical type.
pub fn check_type_map(dialect: &dyn DialectAdapter) -> Result<()> {
    for logical in LogicalType::ALL {
        dialect.native_type(logical)?;
    }
    Ok(())
}

/// Read schema and data from a database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Map the live catalog into a descriptor (read-only catalog queries).
    async fn introspect(&self) -> Result<SchemaDescriptor>;

    /// User tables in discovery order, internal catalog tables excluded.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Exact row count for a table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Read the next batch after `opts.after`, ordered by primary key.
    async fn read_batch(&self, opts: &ReadOptions) -> Result<Vec<Row>>;

    /// Fetch one row by primary key.
    async fn fetch_by_key(
        &self,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        key: &[SqlValue],
    ) -> Result<Option<Row>>;

    /// Run a trivial query to confirm the connection works.
    async fn test_connection(&self) -> Result<()>;

    /// Database type identifier (`sqlite`, `postgres`).
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// Write schema and data to a database.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Execute a single statement, returning affected rows.
    async fn execute(&self, statement: &str) -> Result<u64>;

    /// Upsert rows one by one inside a batch transaction.
    ///
    /// Individual row failures are collected into the outcome; an `Err` means
    /// the batch as a whole could not be attempted.
    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        rows: Vec<Row>,
    ) -> Result<UpsertOutcome>;

    /// Delete every row from a table.
    async fn clear_table(&self, table: &str) -> Result<()>;

    /// Advance generated-key sequences past the loaded rows.
    async fn reset_sequences(&self, table: &TableSpec) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_cursor_advances_past_last_key() {
        let mut cursor = BatchCursor::new(
            "skills",
            vec!["name".into(), "id".into()],
            vec!["id".into()],
            2,
        )
        .unwrap();
        assert!(cursor.options().after.is_none());

        cursor.advance(&[
            vec![SqlValue::Text("a".into()), SqlValue::Int(1)],
            vec![SqlValue::Text("b".into()), SqlValue::Int(2)],
        ]);
        assert_eq!(cursor.options().after, Some(vec![SqlValue::Int(2)]));
        assert!(!cursor.is_exhausted());

        cursor.advance(&[vec![SqlValue::Text("c".into()), SqlValue::Int(3)]]);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_batch_cursor_empty_batch_is_exhausted() {
        let mut cursor =
            BatchCursor::new("t", vec!["id".into()], vec!["id".into()], 10).unwrap();
        cursor.advance(&[]);
        assert!(cursor.is_exhausted());
        assert!(cursor.options().after.is_none());
    }

    #[test]
    fn test_batch_cursor_requires_selected_key() {
        let err = BatchCursor::new("t", vec!["name".into()], vec!["id".into()], 10).unwrap_err();
        assert!(matches!(err, MigrateError::Schema(_)));
        let err = BatchCursor::new("t", vec!["id".into()], vec![], 10).unwrap_err();
        assert!(matches!(err, MigrateError::NoPrimaryKey(_)));
    }

    #[test]
    fn test_record_error_display() {
        let err = RecordError {
            key: "id=4".into(),
            message: "NOT NULL constraint failed".into(),
        };
        assert_eq!(err.to_string(), "[id=4] NOT NULL constraint failed");
    }
}
