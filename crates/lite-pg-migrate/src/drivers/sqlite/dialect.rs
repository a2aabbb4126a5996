//! SQLite SQL dialect.
//!
//! SQLite accepts any declared type name and assigns a storage affinity from
//! it, so the type map below is chosen to keep the declared name readable
//! while landing in the right affinity. Introspection falls back to SQLite's
//! affinity rules for names outside the map.

use crate::core::schema::{ColumnSpec, DefaultValue, LogicalType, TableSpec};
use crate::core::traits::DialectAdapter;
use crate::error::{MigrateError, Result};

/// Native types for each logical type.
const SQLITE_TYPE_MAP: &[(LogicalType, &str)] = &[
    (LogicalType::Integer, "INTEGER"),
    (LogicalType::Text, "TEXT"),
    (LogicalType::Real, "REAL"),
    (LogicalType::Timestamp, "TIMESTAMP"),
    (LogicalType::Boolean, "BOOLEAN"),
    (LogicalType::Json, "JSON"),
];

/// SQLite dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    pub fn new() -> Self {
        Self
    }
}

impl DialectAdapter for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn type_map(&self) -> &'static [(LogicalType, &'static str)] {
        SQLITE_TYPE_MAP
    }

    fn logical_type(&self, native: &str) -> Option<LogicalType> {
        let native = native.trim().to_uppercase();
        if let Some((logical, _)) = SQLITE_TYPE_MAP.iter().find(|(_, n)| *n == native) {
            return Some(*logical);
        }

        // Affinity rules, plus the common date and boolean spellings
        if native.contains("BOOL") {
            Some(LogicalType::Boolean)
        } else if native.contains("DATE") || native.contains("TIME") {
            Some(LogicalType::Timestamp)
        } else if native.contains("JSON") {
            Some(LogicalType::Json)
        } else if native.contains("INT") {
            Some(LogicalType::Integer)
        } else if native.contains("CHAR") || native.contains("CLOB") || native.contains("TEXT") {
            Some(LogicalType::Text)
        } else if native.contains("REAL")
            || native.contains("FLOA")
            || native.contains("DOUB")
            || native.contains("NUMERIC")
            || native.contains("DECIMAL")
        {
            Some(LogicalType::Real)
        } else {
            None
        }
    }

    fn render_default(&self, default: &DefaultValue) -> String {
        match default {
            DefaultValue::Integer(i) => i.to_string(),
            DefaultValue::Real(f) => f.to_string(),
            DefaultValue::Text(s) => quote_literal(s),
            DefaultValue::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
            DefaultValue::Json(v) => quote_literal(&v.to_string()),
        }
    }

    fn render_auto_increment_column(&self, column: &ColumnSpec) -> String {
        format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
            self.quote_ident(&column.name)
        )
    }

    fn inline_primary_key(&self, table: &TableSpec) -> bool {
        table.has_auto_increment_key()
    }

    /// SQLite cannot add UNIQUE columns, non-constant defaults, or NOT NULL
    /// columns without a default, so those parts are dropped here.
    fn render_add_column(&self, table: &str, column: &ColumnSpec) -> Result<String> {
        if column.auto_increment {
            return Err(MigrateError::Schema(format!(
                "cannot add generated key column '{}' to existing table '{}'",
                column.name, table
            )));
        }

        let mut relaxed = column.clone();
        relaxed.unique = false;
        if relaxed.default == Some(DefaultValue::CurrentTimestamp) {
            relaxed.default = None;
        }
        if relaxed.default.is_none() {
            relaxed.nullable = true;
        }

        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.qualify_table(table),
            self.render_column(&relaxed)?
        ))
    }

    fn add_column_omissions(&self, column: &ColumnSpec) -> Vec<&'static str> {
        let mut omitted = Vec::new();
        if column.unique {
            omitted.push("UNIQUE");
        }
        if column.default == Some(DefaultValue::CurrentTimestamp) {
            omitted.push("DEFAULT CURRENT_TIMESTAMP");
            if !column.nullable {
                omitted.push("NOT NULL");
            }
        }
        omitted
    }

    fn build_clear_table(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.qualify_table(table))
    }
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
