//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Provides PostgreSQL-specific identifier quoting, parameter placeholders,
//! type mapping, and DDL rendering. Tables are always schema-qualified.

use crate::core::schema::{ColumnSpec, DefaultValue, LogicalType};
use crate::core::traits::DialectAdapter;
use crate::error::{MigrateError, Result};

/// Native types for each logical type.
const PG_TYPE_MAP: &[(LogicalType, &str)] = &[
    (LogicalType::Integer, "BIGINT"),
    (LogicalType::Text, "TEXT"),
    (LogicalType::Real, "DOUBLE PRECISION"),
    (LogicalType::Timestamp, "TIMESTAMP"),
    (LogicalType::Boolean, "BOOLEAN"),
    (LogicalType::Json, "JSONB"),
];

/// Introspected `information_schema.columns.data_type` values (`udt_name` for
/// extension types such as `citext`).
const PG_NATIVE_TYPES: &[(&str, LogicalType)] = &[
    ("smallint", LogicalType::Integer),
    ("integer", LogicalType::Integer),
    ("bigint", LogicalType::Integer),
    ("text", LogicalType::Text),
    ("character varying", LogicalType::Text),
    ("character", LogicalType::Text),
    ("uuid", LogicalType::Text),
    ("citext", LogicalType::Text),
    ("real", LogicalType::Real),
    ("double precision", LogicalType::Real),
    ("numeric", LogicalType::Real),
    ("timestamp without time zone", LogicalType::Timestamp),
    ("timestamp with time zone", LogicalType::Timestamp),
    ("date", LogicalType::Timestamp),
    ("boolean", LogicalType::Boolean),
    ("json", LogicalType::Json),
    ("jsonb", LogicalType::Json),
];

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    schema: String,
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new("public")
    }
}

impl PostgresDialect {
    /// Create a dialect that qualifies tables with `schema`.
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }
}

impl DialectAdapter for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        // Embedded double quotes are doubled
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualify_table(&self, table: &str) -> String {
        format!("{}.{}", self.quote_ident(&self.schema), self.quote_ident(table))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn type_map(&self) -> &'static [(LogicalType, &'static str)] {
        PG_TYPE_MAP
    }

    fn logical_type(&self, native: &str) -> Option<LogicalType> {
        let native = native.trim().to_lowercase();
        PG_NATIVE_TYPES
            .iter()
            .find(|(n, _)| *n == native)
            .map(|(_, l)| *l)
            .or_else(|| match native.as_str() {
                "int2" | "int4" | "int8" | "serial" | "bigserial" => Some(LogicalType::Integer),
                "varchar" | "bpchar" | "name" => Some(LogicalType::Text),
                "float4" | "float8" => Some(LogicalType::Real),
                "timestamp" | "timestamptz" => Some(LogicalType::Timestamp),
                "bool" => Some(LogicalType::Boolean),
                _ => None,
            })
    }

    fn render_default(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Real(f) => f.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::Json(v) => quote_literal(&v.to_string()),
        }
    }

    fn render_auto_increment_column(&self, column: &ColumnSpec) -> String {
        format!("{} BIGSERIAL NOT NULL", self.quote_ident(&column.name))
    }

    fn render_add_column(&self, table: &str, column: &ColumnSpec) -> Result<String> {
        if column.auto_increment {
            return Err(MigrateError::Schema(format!(
                "cannot add generated key column '{}' to existing table '{}'",
                column.name, table
            )));
        }
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            self.qualify_table(table),
            self.render_column(column)?
        ))
    }

    fn build_clear_table(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {} CASCADE", self.qualify_table(table))
    }
}

/// Quote a string literal, doubling embedded single quotes.
fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
