//! Deterministic record hashes.
//!
//! A record is serialized as a JSON object with sorted keys (nested objects
//! included) and hashed with SHA-256. Values are conformed to the column's
//! logical type first, so `1` stored by SQLite and `true` stored by
//! PostgreSQL in a boolean column produce the same fingerprint.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::core::schema::LogicalType;
use crate::core::value::SqlValue;

/// SHA-256 of a record's canonical serialization, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordFingerprint(String);

impl RecordFingerprint {
    /// Fingerprint a row given its column names and logical types.
    pub fn compute(columns: &[String], types: &[LogicalType], row: &[SqlValue]) -> Self {
        let record: BTreeMap<&str, JsonValue> = columns
            .iter()
            .zip(types)
            .zip(row)
            .map(|((name, ty), value)| {
                let value = match value.clone().conform(*ty) {
                    Ok(conformed) => conformed.to_canonical_json(),
                    Err(_) => value.to_canonical_json(),
                };
                (name.as_str(), canonicalize(value))
            })
            .collect();

        let content = serde_json::to_string(&record).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuild nested objects with their keys in sorted order.
fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            JsonValue::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fingerprint_ignores_storage_class() {
        let columns = cols(&["id", "active", "meta", "created_at"]);
        let types = [
            LogicalType::Integer,
            LogicalType::Boolean,
            LogicalType::Json,
            LogicalType::Timestamp,
        ];
        let sqlite_row = vec![
            SqlValue::Int(1),
            SqlValue::Int(1),
            SqlValue::Text(r#"{"b": 2, "a": 1}"#.into()),
            SqlValue::Text("2026-03-01 10:00:00".into()),
        ];
        let pg_row = vec![
            SqlValue::Int(1),
            SqlValue::Bool(true),
            SqlValue::Json(json!({"a": 1, "b": 2})),
            SqlValue::Text("2026-03-01T10:00:00".into()),
        ];
        assert_eq!(
            RecordFingerprint::compute(&columns, &types, &sqlite_row),
            RecordFingerprint::compute(&columns, &types, &pg_row)
        );
    }

    #[test]
    fn test_fingerprint_detects_changes() {
        let columns = cols(&["id", "name"]);
        let types = [LogicalType::Integer, LogicalType::Text];
        let a = RecordFingerprint::compute(
            &columns,
            &types,
            &[SqlValue::Int(1), SqlValue::Text("rust".into())],
        );
        let b = RecordFingerprint::compute(
            &columns,
            &types,
            &[SqlValue::Int(1), SqlValue::Text("Rust".into())],
        );
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }
}
