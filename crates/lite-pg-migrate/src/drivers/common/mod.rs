//! Common utilities shared across database drivers.
//!
//! - [`dsn`]: DSN parsing, dialect detection and redaction
//! - [`tls`]: TLS configuration for PostgreSQL connections

pub mod dsn;
pub mod tls;

pub use dsn::{parse_postgres_dsn, redact_dsn, sqlite_path, Dialect, PgDsn};
pub use tls::{client_config, make_tls_connect, SslMode};
