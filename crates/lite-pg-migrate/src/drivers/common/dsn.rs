//! DSN parsing shared by the drivers.
//!
//! SQLite DSNs follow the SQLAlchemy convention: `sqlite:///relative.db`
//! and `sqlite:////absolute/path.db`. PostgreSQL DSNs are libpq URLs with two
//! extra query parameters understood here: `sslmode` (any of the TLS modes)
//! and `schema` (target schema, default `public`).

use std::str::FromStr;

use tokio_postgres::Config as PgConfig;
use url::Url;

use super::tls::SslMode;
use crate::error::{MigrateError, Result};

/// Database family addressed by a DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Detect the dialect from the DSN scheme.
    pub fn from_dsn(dsn: &str) -> Result<Self> {
        let scheme = dsn
            .split_once(':')
            .map(|(scheme, _)| scheme.to_lowercase())
            .ok_or_else(|| MigrateError::Config(format!("DSN has no scheme: {}", redact_dsn(dsn))))?;

        match scheme.as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(MigrateError::Config(format!(
                "Unsupported DSN scheme '{}'. Use sqlite:// or postgresql://",
                other
            ))),
        }
    }

    /// Parse a dialect name as used on the command line.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(MigrateError::Config(format!(
                "Unknown dialect '{}'. Valid values: sqlite, postgres",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replace the password in a DSN so it can be logged.
pub fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("[REDACTED]")).is_ok() {
                url.to_string()
            } else {
                "[REDACTED]".to_string()
            }
        }
        _ => dsn.to_string(),
    }
}

/// File path addressed by a SQLite DSN (`:memory:` for an in-memory database).
pub fn sqlite_path(dsn: &str) -> Result<String> {
    let rest = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .ok_or_else(|| MigrateError::Config(format!("Not a SQLite DSN: {}", dsn)))?;

    let rest = rest.split('?').next().unwrap_or_default();
    // `sqlite:///x.db` addresses "x.db" (relative), `sqlite:////x.db` addresses "/x.db" (absolute)
    let path = rest.strip_prefix('/').unwrap_or(rest);

    if path.is_empty() {
        return Err(MigrateError::Config(format!(
            "SQLite DSN has no database path: {}",
            dsn
        )));
    }
    Ok(path.to_string())
}

/// Parsed PostgreSQL DSN.
#[derive(Debug, Clone)]
pub struct PgDsn {
    pub config: PgConfig,
    pub ssl_mode: SslMode,
    pub schema: String,
}

/// Parse a PostgreSQL DSN, extracting `sslmode` and `schema`.
pub fn parse_postgres_dsn(dsn: &str) -> Result<PgDsn> {
    let mut url = Url::parse(dsn)
        .map_err(|e| MigrateError::Config(format!("Invalid PostgreSQL DSN {}: {}", redact_dsn(dsn), e)))?;

    let mut ssl_mode = SslMode::Disable;
    let mut schema = "public".to_string();
    let mut passthrough = Vec::new();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "sslmode" => ssl_mode = SslMode::parse(&value)?,
            "schema" => schema = value.into_owned(),
            _ => passthrough.push((key.into_owned(), value.into_owned())),
        }
    }

    if passthrough.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(passthrough);
    }

    let config = PgConfig::from_str(url.as_str())
        .map_err(|e| MigrateError::Config(format!("Invalid PostgreSQL DSN {}: {}", redact_dsn(dsn), e)))?;

    if config.get_dbname().is_none() {
        return Err(MigrateError::Config(format!(
            "PostgreSQL DSN has no database name: {}",
            redact_dsn(dsn)
        )));
    }

    Ok(PgDsn {
        config,
        ssl_mode,
        schema,
    })
}
