//! SQLite connection pool.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column as _, Row as _, Sqlite, TypeInfo, ValueRef};
use tracing::info;

use super::dialect::SqliteDialect;
use crate::core::value::{format_timestamp, Row, SqlValue};
use crate::drivers::common::{redact_dsn, sqlite_path};
use crate::error::{MigrateError, Result};

/// SQLite endpoint backed by an sqlx pool.
///
/// Foreign key enforcement is switched on for every pooled connection.
pub struct SqliteDriver {
    pub(super) pool: SqlitePool,
    pub(super) dialect: SqliteDialect,
    pub(super) endpoint: String,
    path: Option<PathBuf>,
}

impl SqliteDriver {
    /// Open (creating if missing) the database file named by `dsn`.
    pub async fn connect(dsn: &str, max_conns: u32) -> Result<Self> {
        let endpoint = redact_dsn(dsn);
        let path = sqlite_path(dsn)?;
        let in_memory = path == ":memory:";

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| MigrateError::Config(format!("Invalid SQLite DSN {}: {}", dsn, e)))?
        } else {
            SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true)
        }
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

        // An in-memory database lives as long as its single connection
        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_conns.max(1) })
            .acquire_timeout(Duration::from_secs(30));
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::connectivity(&endpoint, e))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| MigrateError::connectivity(&endpoint, e))?;

        info!("Connected to SQLite: {}", endpoint);
        Ok(Self {
            pool,
            dialect: SqliteDialect::new(),
            endpoint,
            path: (!in_memory).then(|| PathBuf::from(path)),
        })
    }

    pub fn dialect(&self) -> &SqliteDialect {
        &self.dialect
    }

    /// Redacted DSN, for logs and error messages.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Database file, or `None` for an in-memory database.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Bind one value using SQLite storage classes.
///
/// Booleans are stored as 0/1, timestamps as text, JSON as serialized text.
pub(super) fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Timestamp(ts) => query.bind(format_timestamp(ts)),
        SqlValue::Json(v) => query.bind(v.to_string()),
    }
}

/// Bind every value of a row in order.
pub(super) fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &[SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = bind_value(query, value);
    }
    query
}

/// Decode a row by the storage class of each value.
pub(super) fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        let storage = raw.type_info().name().to_string();
        let value = match storage.as_str() {
            "INTEGER" => SqlValue::Int(row.try_get::<i64, _>(idx)?),
            "REAL" => SqlValue::Real(row.try_get::<f64, _>(idx)?),
            "BLOB" => {
                let bytes = row.try_get::<Vec<u8>, _>(idx)?;
                SqlValue::Text(String::from_utf8(bytes).map_err(|_| {
                    MigrateError::transfer(
                        row.columns()[idx].name(),
                        "binary values are not supported",
                    )
                })?)
            }
            _ => SqlValue::Text(row.try_get::<String, _>(idx)?),
        };
        values.push(value);
    }
    Ok(values)
}

/// Database error message without the driver prefix.
pub(super) fn db_message(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}
