//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors (bad YAML, invalid DSN, missing descriptor).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connectivity failures.
pub const EXIT_CONNECTIVITY_ERROR: u8 = 2;
/// Exit code for schema creation or verification failures.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code for a migration that ended in `Failed` or `RolledBack`.
pub const EXIT_MIGRATION_FAILED: u8 = 4;
/// Exit code for validation that finished with errors or warnings.
pub const EXIT_VALIDATION_ERROR: u8 = 5;
/// Exit code for checkpoint and lock errors.
pub const EXIT_STATE_ERROR: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad DSN, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not reach or authenticate against a database endpoint
    #[error("Connection to {endpoint} failed: {message}")]
    Connectivity { endpoint: String, message: String },

    /// Schema descriptor is invalid, or DDL could not be applied
    #[error("Schema error: {0}")]
    Schema(String),

    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Pre- or post-validation failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Table has no primary key (required for keyset reads and upserts)
    #[error("Table {0} has no primary key - keyset reads and upserts require primary keys")]
    NoPrimaryKey(String),

    /// Checkpoint file error
    #[error("Checkpoint error: {0}")]
    State(String),

    /// Endpoints or descriptor changed since the checkpoint was written
    #[error("Configuration or schema has changed since the checkpoint was written - cannot resume. Start a fresh migration instead.")]
    ConfigChanged,

    /// Another run holds the checkpoint lock
    #[error("Migration {0} is locked by another run")]
    Locked(String),

    /// Unexpected failure inside a migration phase
    #[error("Migration failed during {phase}: {message}")]
    Fatal { phase: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connectivity error for an endpoint (pass a redacted DSN)
    pub fn connectivity(endpoint: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::Connectivity {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Fatal error for a phase
    pub fn fatal(phase: impl std::fmt::Display, message: impl Into<String>) -> Self {
        MigrateError::Fatal {
            phase: phase.to_string(),
            message: message.into(),
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::NoPrimaryKey(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Connectivity { .. } | MigrateError::Pool { .. } => {
                EXIT_CONNECTIVITY_ERROR
            }
            MigrateError::Schema(_) => EXIT_SCHEMA_ERROR,
            MigrateError::Sqlite(_)
            | MigrateError::Postgres(_)
            | MigrateError::Transfer { .. }
            | MigrateError::Fatal { .. } => EXIT_MIGRATION_FAILED,
            MigrateError::Validation(_) => EXIT_VALIDATION_ERROR,
            MigrateError::State(_)
            | MigrateError::ConfigChanged
            | MigrateError::Locked(_)
            | MigrateError::Json(_) => EXIT_STATE_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            MigrateError::connectivity("sqlite:///a.db", "refused").exit_code(),
            EXIT_CONNECTIVITY_ERROR
        );
        assert_eq!(MigrateError::Schema("x".into()).exit_code(), EXIT_SCHEMA_ERROR);
        assert_eq!(
            MigrateError::transfer("skills", "boom").exit_code(),
            EXIT_MIGRATION_FAILED
        );
        assert_eq!(MigrateError::ConfigChanged.exit_code(), EXIT_STATE_ERROR);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = MigrateError::from(io);
        let text = err.format_detailed();
        assert!(text.starts_with("Error: IO error: denied"));
    }
}
