//! Dialect-neutral schema descriptor: tables, columns, keys, and indexes.
//!
//! A [`SchemaDescriptor`] is the canonical declaration of the application's
//! tables. It is loaded once (YAML or JSON), validated, and never mutated at
//! runtime. Dialect adapters render it into DDL and map introspected catalogs
//! back into it for comparison.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};

/// Logical column type shared by every dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Integer,
    Text,
    Real,
    Timestamp,
    Boolean,
    Json,
}

impl LogicalType {
    /// Every logical type, used to check that dialect type maps are total.
    pub const ALL: [LogicalType; 6] = [
        LogicalType::Integer,
        LogicalType::Text,
        LogicalType::Real,
        LogicalType::Timestamp,
        LogicalType::Boolean,
        LogicalType::Json,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalType::Integer => "integer",
            LogicalType::Text => "text",
            LogicalType::Real => "real",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Boolean => "boolean",
            LogicalType::Json => "json",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column default.
///
/// Written in descriptors as a plain scalar: numbers, booleans, strings, JSON
/// arrays/objects, or the string `CURRENT_TIMESTAMP`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum DefaultValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    CurrentTimestamp,
    Json(serde_json::Value),
}

impl TryFrom<serde_json::Value> for DefaultValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        use serde_json::Value;
        match value {
            Value::Null => Err("use an absent `default` instead of null".to_string()),
            Value::Bool(b) => Ok(DefaultValue::Boolean(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(DefaultValue::Integer(i)),
                None => n
                    .as_f64()
                    .map(DefaultValue::Real)
                    .ok_or_else(|| format!("unsupported numeric default {}", n)),
            },
            Value::String(s) if s.eq_ignore_ascii_case("current_timestamp") => {
                Ok(DefaultValue::CurrentTimestamp)
            }
            Value::String(s) => Ok(DefaultValue::Text(s)),
            other => Ok(DefaultValue::Json(other)),
        }
    }
}

impl From<DefaultValue> for serde_json::Value {
    fn from(value: DefaultValue) -> Self {
        match value {
            DefaultValue::Integer(i) => serde_json::Value::from(i),
            DefaultValue::Real(f) => serde_json::Value::from(f),
            DefaultValue::Text(s) => serde_json::Value::String(s),
            DefaultValue::Boolean(b) => serde_json::Value::Bool(b),
            DefaultValue::CurrentTimestamp => {
                serde_json::Value::String("CURRENT_TIMESTAMP".to_string())
            }
            DefaultValue::Json(v) => v,
        }
    }
}

impl DefaultValue {
    /// Parse a default expression as reported by a catalog.
    ///
    /// Handles the forms both backends emit for the defaults a descriptor can
    /// declare, e.g. `'draft'::text`, `(-1)`, `true`, `now()`. Other
    /// expressions return `None`.
    pub fn from_catalog(expr: &str, logical_type: LogicalType) -> Option<Self> {
        let expr = expr.trim();
        let upper = expr.to_uppercase();
        if upper.starts_with("CURRENT_TIMESTAMP")
            || upper == "NOW()"
            || upper.starts_with("LOCALTIMESTAMP")
            || upper.contains("DATETIME('NOW')")
        {
            return Some(DefaultValue::CurrentTimestamp);
        }

        // Quoted literal, optionally followed by a `::type` cast
        if let Some(rest) = expr.strip_prefix('\'') {
            let end = rest.rfind('\'')?;
            let text = rest[..end].replace("''", "'");
            return match logical_type {
                LogicalType::Json => serde_json::from_str(&text).ok().map(DefaultValue::Json),
                LogicalType::Boolean => match text.to_lowercase().as_str() {
                    "true" | "t" | "1" => Some(DefaultValue::Boolean(true)),
                    "false" | "f" | "0" => Some(DefaultValue::Boolean(false)),
                    _ => None,
                },
                _ => Some(DefaultValue::Text(text)),
            };
        }

        let bare = expr.trim_start_matches('(').trim_end_matches(')');
        match (upper.as_str(), logical_type) {
            ("TRUE", _) => return Some(DefaultValue::Boolean(true)),
            ("FALSE", _) => return Some(DefaultValue::Boolean(false)),
            _ => {}
        }
        if let Ok(i) = bare.parse::<i64>() {
            return Some(match logical_type {
                LogicalType::Boolean => DefaultValue::Boolean(i != 0),
                LogicalType::Real => DefaultValue::Real(i as f64),
                _ => DefaultValue::Integer(i),
            });
        }
        bare.parse::<f64>().ok().map(DefaultValue::Real)
    }
}

/// Column declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub logical_type: LogicalType,

    #[serde(default = "default_true")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,

    /// Integer key generated by the database (SERIAL / AUTOINCREMENT).
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: true,
            default: None,
            unique: false,
            auto_increment: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// Action taken on child rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    Restrict,
}

impl ReferentialAction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::Restrict => "RESTRICT",
        }
    }

    /// Parse the action names reported by catalogs (`CASCADE`, `SET NULL`, ...).
    pub fn from_catalog(action: &str) -> Self {
        match action.trim().to_uppercase().as_str() {
            "CASCADE" | "C" => ReferentialAction::Cascade,
            "SET NULL" | "N" => ReferentialAction::SetNull,
            "RESTRICT" | "R" => ReferentialAction::Restrict,
            _ => ReferentialAction::NoAction,
        }
    }
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    pub columns: Vec<String>,
    pub references_table: String,
    pub references_columns: Vec<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

/// Secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// Table declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeySpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Tables this one references, excluding self-references.
    pub fn depends_on(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.references_table.as_str())
            .filter(|t| *t != self.name)
            .collect()
    }

    /// True when the primary key is a single database-generated integer column.
    pub fn has_auto_increment_key(&self) -> bool {
        self.primary_key.len() == 1
            && self
                .column(&self.primary_key[0])
                .map(|c| c.auto_increment)
                .unwrap_or(false)
    }
}

/// Ordered set of table declarations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub tables: Vec<TableSpec>,
}

impl SchemaDescriptor {
    pub fn new(tables: Vec<TableSpec>) -> Self {
        Self { tables }
    }

    /// Load a descriptor from a `.json`, `.yaml` or `.yml` file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let descriptor: SchemaDescriptor = serde_yaml::from_str(yaml)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let descriptor: SchemaDescriptor = serde_json::from_str(json)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Check structural invariants: unique names, complete keys, resolvable
    /// references, and an acyclic dependency graph.
    pub fn validate(&self) -> Result<()> {
        if self.tables.is_empty() {
            return Err(MigrateError::Schema("descriptor declares no tables".into()));
        }

        let mut table_names = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(MigrateError::Schema("table name must not be empty".into()));
            }
            if !table_names.insert(table.name.as_str()) {
                return Err(MigrateError::Schema(format!(
                    "duplicate table name '{}'",
                    table.name
                )));
            }
        }

        for table in &self.tables {
            validate_table(table, self)?;
        }

        self.dependency_order()?;
        Ok(())
    }

    /// Tables ordered so every parent precedes its children.
    ///
    /// Ties keep declaration order. Self-references are ignored; any other
    /// cycle is an error.
    pub fn dependency_order(&self) -> Result<Vec<&TableSpec>> {
        let mut remaining: BTreeMap<usize, BTreeSet<&str>> = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let deps = t
                    .depends_on()
                    .into_iter()
                    .filter(|d| self.table(d).is_some())
                    .collect();
                (i, deps)
            })
            .collect();

        let mut ordered = Vec::with_capacity(self.tables.len());
        while !remaining.is_empty() {
            let ready = remaining
                .iter()
                .find(|(_, deps)| deps.is_empty())
                .map(|(i, _)| *i);

            let Some(idx) = ready else {
                let stuck: Vec<&str> = remaining
                    .keys()
                    .map(|i| self.tables[*i].name.as_str())
                    .collect();
                return Err(MigrateError::Schema(format!(
                    "foreign key cycle between tables: {}",
                    stuck.join(", ")
                )));
            };

            remaining.remove(&idx);
            let name = self.tables[idx].name.as_str();
            for deps in remaining.values_mut() {
                deps.remove(name);
            }
            ordered.push(&self.tables[idx]);
        }

        Ok(ordered)
    }

    /// Stable SHA-256 fingerprint of the descriptor, stored in checkpoints.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn validate_table(table: &TableSpec, descriptor: &SchemaDescriptor) -> Result<()> {
    let name = &table.name;
    if table.columns.is_empty() {
        return Err(MigrateError::Schema(format!("table '{}' has no columns", name)));
    }

    let mut column_names = HashSet::new();
    for column in &table.columns {
        if column.name.trim().is_empty() {
            return Err(MigrateError::Schema(format!(
                "table '{}' has a column with an empty name",
                name
            )));
        }
        if !column_names.insert(column.name.as_str()) {
            return Err(MigrateError::Schema(format!(
                "duplicate column '{}' in table '{}'",
                column.name, name
            )));
        }
        if column.auto_increment {
            let sole_key = table.primary_key.len() == 1 && table.primary_key[0] == column.name;
            if column.logical_type != LogicalType::Integer || !sole_key {
                return Err(MigrateError::Schema(format!(
                    "{}.{}: auto_increment requires a single-column integer primary key",
                    name, column.name
                )));
            }
        }
    }

    if table.primary_key.is_empty() {
        return Err(MigrateError::NoPrimaryKey(name.clone()));
    }
    for pk in &table.primary_key {
        if !column_names.contains(pk.as_str()) {
            return Err(MigrateError::Schema(format!(
                "primary key column '{}' not declared in table '{}'",
                pk, name
            )));
        }
    }

    for fk in &table.foreign_keys {
        if fk.columns.is_empty() || fk.columns.len() != fk.references_columns.len() {
            return Err(MigrateError::Schema(format!(
                "foreign key on '{}' must list the same number of local and referenced columns",
                name
            )));
        }
        for col in &fk.columns {
            if !column_names.contains(col.as_str()) {
                return Err(MigrateError::Schema(format!(
                    "foreign key column '{}' not declared in table '{}'",
                    col, name
                )));
            }
        }
        let Some(parent) = descriptor.table(&fk.references_table) else {
            return Err(MigrateError::Schema(format!(
                "table '{}' references unknown table '{}'",
                name, fk.references_table
            )));
        };
        for col in &fk.references_columns {
            if parent.column(col).is_none() {
                return Err(MigrateError::Schema(format!(
                    "table '{}' references unknown column '{}.{}'",
                    name, parent.name, col
                )));
            }
        }
    }

    let mut index_names = HashSet::new();
    for index in &table.indexes {
        if !index_names.insert(index.name.as_str()) {
            return Err(MigrateError::Schema(format!(
                "duplicate index '{}' on table '{}'",
                index.name, name
            )));
        }
        if index.columns.is_empty() {
            return Err(MigrateError::Schema(format!(
                "index '{}' on table '{}' has no columns",
                index.name, name
            )));
        }
        for col in &index.columns {
            if !column_names.contains(col.as_str()) {
                return Err(MigrateError::Schema(format!(
                    "index '{}' uses unknown column '{}.{}'",
                    index.name, name, col
                )));
            }
        }
    }

    Ok(())
}

fn default_true() -> bool {
    true
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
tables:
  - name: resources
    columns:
      - { name: id, type: integer, nullable: false }
      - { name: skill_id, type: integer }
      - { name: title, type: text, nullable: false, default: "untitled" }
      - { name: is_free, type: boolean, default: true }
      - { name: created_at, type: timestamp, default: CURRENT_TIMESTAMP }
      - { name: metadata, type: json, default: { tags: [] } }
    primary_key: [id]
    foreign_keys:
      - { columns: [skill_id], references_table: skills, references_columns: [id], on_delete: cascade }
    indexes:
      - { name: idx_resources_skill, columns: [skill_id] }
  - name: skills
    columns:
      - { name: id, type: integer, nullable: false, auto_increment: true }
      - { name: name, type: text, nullable: false, unique: true }
      - { name: parent_id, type: integer }
    primary_key: [id]
    foreign_keys:
      - { columns: [parent_id], references_table: skills, references_columns: [id], on_delete: set_null }
"#;

    #[test]
    fn test_load_yaml_descriptor() {
        let descriptor = SchemaDescriptor::from_yaml(DESCRIPTOR).unwrap();
        assert_eq!(descriptor.tables.len(), 2);

        let resources = descriptor.table("resources").unwrap();
        assert_eq!(
            resources.column("created_at").unwrap().default,
            Some(DefaultValue::CurrentTimestamp)
        );
        assert_eq!(
            resources.column("is_free").unwrap().default,
            Some(DefaultValue::Boolean(true))
        );
        assert!(matches!(
            resources.column("metadata").unwrap().default,
            Some(DefaultValue::Json(_))
        ));
        assert_eq!(
            resources.foreign_keys[0].on_delete,
            ReferentialAction::Cascade
        );
        assert!(descriptor.table("skills").unwrap().has_auto_increment_key());
    }

    #[test]
    fn test_dependency_order_puts_parents_first() {
        let descriptor = SchemaDescriptor::from_yaml(DESCRIPTOR).unwrap();
        let order: Vec<&str> = descriptor
            .dependency_order()
            .unwrap()
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(order, vec!["skills", "resources"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let a = TableSpec {
            name: "a".into(),
            columns: vec![
                ColumnSpec::new("id", LogicalType::Integer),
                ColumnSpec::new("b_id", LogicalType::Integer),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKeySpec {
                columns: vec!["b_id".into()],
                references_table: "b".into(),
                references_columns: vec!["id".into()],
                on_delete: ReferentialAction::NoAction,
            }],
            indexes: vec![],
        };
        let mut b = a.clone();
        b.name = "b".into();
        b.columns[1].name = "a_id".into();
        b.foreign_keys[0].columns = vec!["a_id".into()];
        b.foreign_keys[0].references_table = "a".into();

        let err = SchemaDescriptor::new(vec![a, b]).validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let table = TableSpec {
            name: "t".into(),
            columns: vec![
                ColumnSpec::new("id", LogicalType::Integer),
                ColumnSpec::new("id", LogicalType::Text),
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
            indexes: vec![],
        };
        assert!(SchemaDescriptor::new(vec![table]).validate().is_err());
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let yaml = r#"
tables:
  - name: child
    columns:
      - { name: id, type: integer }
      - { name: parent_id, type: integer }
    primary_key: [id]
    foreign_keys:
      - { columns: [parent_id], references_table: parent, references_columns: [id] }
"#;
        let err = SchemaDescriptor::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown table 'parent'"));
    }

    #[test]
    fn test_missing_primary_key_rejected() {
        let table = TableSpec {
            name: "t".into(),
            columns: vec![ColumnSpec::new("id", LogicalType::Integer)],
            primary_key: vec![],
            foreign_keys: vec![],
            indexes: vec![],
        };
        let err = SchemaDescriptor::new(vec![table]).validate().unwrap_err();
        assert!(matches!(err, MigrateError::NoPrimaryKey(_)));
    }

    #[test]
    fn test_fingerprint_changes_with_schema() {
        let a = SchemaDescriptor::from_yaml(DESCRIPTOR).unwrap();
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.tables[0].columns[2].nullable = true;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_default_from_catalog() {
        assert_eq!(
            DefaultValue::from_catalog("'draft'::text", LogicalType::Text),
            Some(DefaultValue::Text("draft".into()))
        );
        assert_eq!(
            DefaultValue::from_catalog("CURRENT_TIMESTAMP", LogicalType::Timestamp),
            Some(DefaultValue::CurrentTimestamp)
        );
        assert_eq!(
            DefaultValue::from_catalog("now()", LogicalType::Timestamp),
            Some(DefaultValue::CurrentTimestamp)
        );
        assert_eq!(
            DefaultValue::from_catalog("1", LogicalType::Boolean),
            Some(DefaultValue::Boolean(true))
        );
        assert_eq!(
            DefaultValue::from_catalog("(-1)", LogicalType::Integer),
            Some(DefaultValue::Integer(-1))
        );
        assert_eq!(
            DefaultValue::from_catalog("'[]'::jsonb", LogicalType::Json),
            Some(DefaultValue::Json(serde_json::json!([])))
        );
        assert_eq!(DefaultValue::from_catalog("gen_random_uuid()", LogicalType::Text), None);
    }
}
