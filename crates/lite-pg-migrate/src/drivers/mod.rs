//! Database driver implementations.
//!
//! - [`sqlite`]: SQLite driver (sqlx)
//! - [`postgres`]: PostgreSQL driver (tokio-postgres + deadpool)
//! - [`common`]: Shared utilities (DSN parsing, TLS)
//!
//! # Static dispatch
//!
//! [`Connection`] and [`DialectImpl`] are enums over the two backends that
//! implement the core traits with a match per method, so callers can hold a
//! concrete type without boxing.

pub mod common;
pub mod postgres;
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;

pub use common::{redact_dsn, Dialect, SslMode};
pub use postgres::{PostgresDialect, PostgresDriver};
pub use sqlite::{SqliteDialect, SqliteDriver};

use crate::core::schema::{ColumnSpec, DefaultValue, LogicalType, SchemaDescriptor, TableSpec};
use crate::core::traits::{DialectAdapter, ReadOptions, SourceReader, TargetWriter, UpsertOutcome};
use crate::core::value::{Row, SqlValue};
use crate::error::Result;

/// Enum-based static dispatch for dialects.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Sqlite(SqliteDialect),
    Postgres(PostgresDialect),
}

impl DialectImpl {
    /// Dialect with default settings (PostgreSQL schema `public`).
    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Sqlite => DialectImpl::Sqlite(SqliteDialect::new()),
            Dialect::Postgres => DialectImpl::Postgres(PostgresDialect::default()),
        }
    }

    fn inner(&self) -> &dyn DialectAdapter {
        match self {
            DialectImpl::Sqlite(d) => d,
            DialectImpl::Postgres(d) => d,
        }
    }
}

impl DialectAdapter for DialectImpl {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn quote_ident(&self, name: &str) -> String {
        self.inner().quote_ident(name)
    }

    fn qualify_table(&self, table: &str) -> String {
        self.inner().qualify_table(table)
    }

    fn param_placeholder(&self, index: usize) -> String {
        self.inner().param_placeholder(index)
    }

    fn type_map(&self) -> &'static [(LogicalType, &'static str)] {
        self.inner().type_map()
    }

    fn logical_type(&self, native: &str) -> Option<LogicalType> {
        self.inner().logical_type(native)
    }

    fn render_default(&self, default: &DefaultValue) -> String {
        self.inner().render_default(default)
    }

    fn render_auto_increment_column(&self, column: &ColumnSpec) -> String {
        self.inner().render_auto_increment_column(column)
    }

    fn inline_primary_key(&self, table: &TableSpec) -> bool {
        self.inner().inline_primary_key(table)
    }

    fn render_add_column(&self, table: &str, column: &ColumnSpec) -> Result<String> {
        self.inner().render_add_column(table, column)
    }

    fn add_column_omissions(&self, column: &ColumnSpec) -> Vec<&'static str> {
        self.inner().add_column_omissions(column)
    }

    fn build_clear_table(&self, table: &str) -> String {
        self.inner().build_clear_table(table)
    }
}

/// Live connection to either backend.
pub enum Connection {
    Sqlite(SqliteDriver),
    Postgres(PostgresDriver),
}

impl Connection {
    /// Connect to the database named by `dsn`, choosing the driver by scheme.
    pub async fn connect(dsn: &str, max_conns: usize) -> Result<Self> {
        match Dialect::from_dsn(dsn)? {
            Dialect::Sqlite => Ok(Connection::Sqlite(
                SqliteDriver::connect(dsn, u32::try_from(max_conns).unwrap_or(u32::MAX)).await?,
            )),
            Dialect::Postgres => Ok(Connection::Postgres(
                PostgresDriver::connect(dsn, max_conns).await?,
            )),
        }
    }

    pub fn kind(&self) -> Dialect {
        match self {
            Connection::Sqlite(_) => Dialect::Sqlite,
            Connection::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Dialect bound to this connection (including the PostgreSQL schema).
    pub fn dialect(&self) -> DialectImpl {
        match self {
            Connection::Sqlite(d) => DialectImpl::Sqlite(d.dialect().clone()),
            Connection::Postgres(d) => DialectImpl::Postgres(d.dialect().clone()),
        }
    }

    /// Redacted DSN.
    pub fn endpoint(&self) -> &str {
        match self {
            Connection::Sqlite(d) => d.endpoint(),
            Connection::Postgres(d) => d.endpoint(),
        }
    }

    /// Database file for SQLite connections.
    pub fn sqlite_path(&self) -> Option<&Path> {
        match self {
            Connection::Sqlite(d) => d.path(),
            Connection::Postgres(_) => None,
        }
    }

    fn reader(&self) -> &dyn SourceReader {
        match self {
            Connection::Sqlite(d) => d,
            Connection::Postgres(d) => d,
        }
    }

    fn writer(&self) -> &dyn TargetWriter {
        match self {
            Connection::Sqlite(d) => d,
            Connection::Postgres(d) => d,
        }
    }
}

#[async_trait]
impl SourceReader for Connection {
    async fn introspect(&self) -> Result<SchemaDescriptor> {
        self.reader().introspect().await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.reader().list_tables().await
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        self.reader().row_count(table).await
    }

    async fn read_batch(&self, opts: &ReadOptions) -> Result<Vec<Row>> {
        self.reader().read_batch(opts).await
    }

    async fn fetch_by_key(
        &self,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        key: &[SqlValue],
    ) -> Result<Option<Row>> {
        self.reader()
            .fetch_by_key(table, columns, pk_columns, key)
            .await
    }

    async fn test_connection(&self) -> Result<()> {
        self.reader().test_connection().await
    }

    fn db_type(&self) -> &str {
        self.reader().db_type()
    }

    async fn close(&self) {
        self.reader().close().await
    }
}

#[async_trait]
impl TargetWriter for Connection {
    async fn execute(&self, statement: &str) -> Result<u64> {
        self.writer().execute(statement).await
    }

    async fn upsert_batch(
        &self,
        table: &str,
        columns: &[String],
        pk_columns: &[String],
        rows: Vec<Row>,
    ) -> Result<UpsertOutcome> {
        self.writer()
            .upsert_batch(table, columns, pk_columns, rows)
            .await
    }

    async fn clear_table(&self, table: &str) -> Result<()> {
        self.writer().clear_table(table).await
    }

    async fn reset_sequences(&self, table: &TableSpec) -> Result<()> {
        self.writer().reset_sequences(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_impl_dispatch() {
        let sqlite = DialectImpl::for_dialect(Dialect::Sqlite);
        let pg = DialectImpl::for_dialect(Dialect::Postgres);
        assert_eq!(sqlite.param_placeholder(2), "?2");
        assert_eq!(pg.param_placeholder(2), "$2");
        assert_eq!(sqlite.qualify_table("t"), "\"t\"");
        assert_eq!(pg.qualify_table("t"), "\"public\".\"t\"");
        assert!(crate::core::traits::check_type_map(&sqlite).is_ok());
        assert!(crate::core::traits::check_type_map(&pg).is_ok());
    }

    #[tokio::test]
    async fn test_connection_dispatches_sqlite() {
        let conn = Connection::connect("sqlite:///:memory:", 4).await.unwrap();
        assert_eq!(conn.kind(), Dialect::Sqlite);
        assert_eq!(conn.db_type(), "sqlite");
        assert!(conn.sqlite_path().is_none());
        conn.test_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_config_error() {
        let err = Connection::connect("mysql://u@h/db", 1).await.err().unwrap();
        assert_eq!(err.exit_code(), crate::error::EXIT_CONFIG_ERROR);
    }
}
