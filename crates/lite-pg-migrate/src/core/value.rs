//! Owned SQL values exchanged between readers and writers.
//!
//! Readers decode whatever storage class the database hands back; before a
//! value is written (or fingerprinted) it is conformed to the logical type of
//! the destination column, so `1`, `"1"` and `true` all become the same
//! boolean when the column is declared `boolean`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

use super::schema::LogicalType;

/// A row is a list of values aligned with a column list.
pub type Row = Vec<SqlValue>;

/// SQL value with owned data.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Json(JsonValue),
}

/// Timestamp layouts accepted from text columns.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short type label used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Int(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Json(_) => "json",
        }
    }

    /// Convert this value into the representation of `target`.
    ///
    /// NULL passes through unchanged. Lossy conversions (a fractional or
    /// out-of-range real into an integer column, unparseable text) are errors.
    pub fn conform(self, target: LogicalType) -> std::result::Result<SqlValue, String> {
        let original = self.type_name();
        let converted = match (self, target) {
            (SqlValue::Null, _) => Some(SqlValue::Null),

            (SqlValue::Int(v), LogicalType::Integer) => Some(SqlValue::Int(v)),
            (SqlValue::Bool(b), LogicalType::Integer) => Some(SqlValue::Int(b as i64)),
            (SqlValue::Real(f), LogicalType::Integer) => {
                // `i64::MAX as f64` rounds up to 2^63, which does not fit
                (f.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(&f))
                    .then_some(SqlValue::Int(f as i64))
            }
            (SqlValue::Text(s), LogicalType::Integer) => {
                s.trim().parse::<i64>().ok().map(SqlValue::Int)
            }

            (SqlValue::Real(f), LogicalType::Real) => Some(SqlValue::Real(f)),
            (SqlValue::Int(v), LogicalType::Real) => Some(SqlValue::Real(v as f64)),
            (SqlValue::Text(s), LogicalType::Real) => {
                s.trim().parse::<f64>().ok().map(SqlValue::Real)
            }

            (SqlValue::Text(s), LogicalType::Text) => Some(SqlValue::Text(s)),
            (SqlValue::Int(v), LogicalType::Text) => Some(SqlValue::Text(v.to_string())),
            (SqlValue::Real(f), LogicalType::Text) => Some(SqlValue::Text(f.to_string())),
            (SqlValue::Bool(b), LogicalType::Text) => Some(SqlValue::Text(b.to_string())),
            (SqlValue::Timestamp(ts), LogicalType::Text) => {
                Some(SqlValue::Text(format_timestamp(&ts)))
            }
            (SqlValue::Json(v), LogicalType::Text) => Some(SqlValue::Text(v.to_string())),

            (SqlValue::Timestamp(ts), LogicalType::Timestamp) => Some(SqlValue::Timestamp(ts)),
            (SqlValue::Text(s), LogicalType::Timestamp) => {
                parse_timestamp(&s).map(SqlValue::Timestamp)
            }
            (SqlValue::Int(secs), LogicalType::Timestamp) => {
                DateTime::from_timestamp(secs, 0).map(|dt| SqlValue::Timestamp(dt.naive_utc()))
            }

            (SqlValue::Bool(b), LogicalType::Boolean) => Some(SqlValue::Bool(b)),
            (SqlValue::Int(v), LogicalType::Boolean) => Some(SqlValue::Bool(v != 0)),
            (SqlValue::Text(s), LogicalType::Boolean) => parse_bool(&s).map(SqlValue::Bool),

            (SqlValue::Json(v), LogicalType::Json) => Some(SqlValue::Json(v)),
            (SqlValue::Text(s), LogicalType::Json) => {
                serde_json::from_str::<JsonValue>(&s).ok().map(SqlValue::Json)
            }
            (SqlValue::Int(v), LogicalType::Json) => Some(SqlValue::Json(JsonValue::from(v))),
            (SqlValue::Real(f), LogicalType::Json) => Some(SqlValue::Json(JsonValue::from(f))),
            (SqlValue::Bool(b), LogicalType::Json) => Some(SqlValue::Json(JsonValue::Bool(b))),

            _ => None,
        };

        converted.ok_or_else(|| format!("cannot convert {} value to {}", original, target))
    }

    /// Canonical JSON form used for record fingerprints.
    pub fn to_canonical_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int(v) => JsonValue::from(*v),
            SqlValue::Real(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(f.to_string())),
            SqlValue::Text(s) => JsonValue::String(s.clone()),
            SqlValue::Timestamp(ts) => JsonValue::String(format_timestamp(ts)),
            SqlValue::Json(v) => v.clone(),
        }
    }

    /// Render for error messages and record keys.
    pub fn display(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Text(s) => s.clone(),
            other => match other.to_canonical_json() {
                JsonValue::String(s) => s,
                v => v.to_string(),
            },
        }
    }
}

/// Format a timestamp the way both backends store it as text.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Parse timestamps stored as text, including RFC 3339 and bare dates.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Render a row's key values as `col=value` pairs for error messages.
pub fn describe_key(columns: &[String], values: &[SqlValue]) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(c, v)| format!("{}={}", c, v.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_conform_integer() {
        assert_eq!(
            SqlValue::Text(" 42 ".into()).conform(LogicalType::Integer),
            Ok(SqlValue::Int(42))
        );
        assert_eq!(
            SqlValue::Real(3.0).conform(LogicalType::Integer),
            Ok(SqlValue::Int(3))
        );
        assert!(SqlValue::Real(3.5).conform(LogicalType::Integer).is_err());
        assert!(SqlValue::Text("abc".into())
            .conform(LogicalType::Integer)
            .is_err());
    }

    #[test]
    fn test_conform_integer_rejects_out_of_range_reals() {
        assert!(SqlValue::Real(1e30).conform(LogicalType::Integer).is_err());
        assert!(SqlValue::Real(-1e30).conform(LogicalType::Integer).is_err());
        assert!(SqlValue::Real(9_223_372_036_854_775_808.0)
            .conform(LogicalType::Integer)
            .is_err());
        assert!(SqlValue::Real(f64::INFINITY)
            .conform(LogicalType::Integer)
            .is_err());
        assert_eq!(
            SqlValue::Real(-9_223_372_036_854_775_808.0).conform(LogicalType::Integer),
            Ok(SqlValue::Int(i64::MIN))
        );
        assert_eq!(
            SqlValue::Real(1e15).conform(LogicalType::Integer),
            Ok(SqlValue::Int(1_000_000_000_000_000))
        );
    }

    #[test]
    fn test_conform_boolean_from_sqlite_storage() {
        assert_eq!(
            SqlValue::Int(1).conform(LogicalType::Boolean),
            Ok(SqlValue::Bool(true))
        );
        assert_eq!(
            SqlValue::Int(0).conform(LogicalType::Boolean),
            Ok(SqlValue::Bool(false))
        );
        assert_eq!(
            SqlValue::Text("f".into()).conform(LogicalType::Boolean),
            Ok(SqlValue::Bool(false))
        );
    }

    #[test]
    fn test_conform_timestamp_formats() {
        let expected = SqlValue::Timestamp(ts("2024-03-01 10:30:00"));
        for input in [
            "2024-03-01 10:30:00",
            "2024-03-01T10:30:00",
            "2024-03-01T10:30:00Z",
            "2024-03-01 10:30",
        ] {
            assert_eq!(
                SqlValue::Text(input.into()).conform(LogicalType::Timestamp),
                Ok(expected.clone()),
                "input {}",
                input
            );
        }
        assert_eq!(
            SqlValue::Text("2024-03-01".into()).conform(LogicalType::Timestamp),
            Ok(SqlValue::Timestamp(ts("2024-03-01 00:00:00")))
        );
    }

    #[test]
    fn test_conform_json_from_text() {
        let value = SqlValue::Text(r#"{"b": 1, "a": [true]}"#.into())
            .conform(LogicalType::Json)
            .unwrap();
        assert_eq!(
            value,
            SqlValue::Json(serde_json::json!({"a": [true], "b": 1}))
        );
        assert!(SqlValue::Text("{not json".into())
            .conform(LogicalType::Json)
            .is_err());
    }

    #[test]
    fn test_null_passes_through() {
        for ty in LogicalType::ALL {
            assert_eq!(SqlValue::Null.conform(ty), Ok(SqlValue::Null));
        }
    }

    #[test]
    fn test_canonical_json_of_timestamp_and_real() {
        let value = SqlValue::Timestamp(ts("2024-03-01 10:30:00"));
        assert_eq!(
            value.to_canonical_json(),
            JsonValue::String("2024-03-01 10:30:00".into())
        );
        assert_eq!(SqlValue::Real(1.5).to_canonical_json(), serde_json::json!(1.5));
    }

    #[test]
    fn test_describe_key() {
        let key = describe_key(
            &["id".to_string(), "lang".to_string()],
            &[SqlValue::Int(7), SqlValue::Text("en".into())],
        );
        assert_eq!(key, "id=7, lang=en");
    }
}
