//! Binding [`SqlValue`]s as PostgreSQL parameters and decoding result rows.
//!
//! Parameters are conformed to the logical type of the server-declared
//! parameter type first, so a SQLite `1` bound to a BOOLEAN column is sent as
//! `true`.

use std::error::Error;
use std::str::FromStr;

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::core::schema::LogicalType;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

type BoxError = Box<dyn Error + Sync + Send>;

/// Logical type for a PostgreSQL wire type.
pub(crate) fn logical_for_type(ty: &Type) -> Option<LogicalType> {
    match *ty {
        Type::BOOL => Some(LogicalType::Boolean),
        Type::INT2 | Type::INT4 | Type::INT8 => Some(LogicalType::Integer),
        Type::FLOAT4 | Type::FLOAT8 | Type::NUMERIC => Some(LogicalType::Real),
        Type::TIMESTAMP | Type::TIMESTAMPTZ | Type::DATE => Some(LogicalType::Timestamp),
        Type::JSON | Type::JSONB => Some(LogicalType::Json),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::UUID => {
            Some(LogicalType::Text)
        }
        // extension type, no fixed OID
        ref other if other.name() == "citext" => Some(LogicalType::Text),
        _ => None,
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }

        // NUMERIC text keeps its digits instead of going through f64
        if *ty == Type::NUMERIC {
            return numeric_param(self)?.to_sql(ty, out);
        }

        let logical = logical_for_type(ty)
            .ok_or_else(|| format!("unsupported PostgreSQL parameter type {}", ty))?;
        let value = self.clone().conform(logical)?;

        if *ty == Type::UUID {
            return match value {
                SqlValue::Text(s) => Uuid::parse_str(s.trim())?.to_sql(ty, out),
                other => Err(format!("cannot convert {} value to uuid", other.type_name()).into()),
            };
        }

        match value {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => b.to_sql(ty, out),
            SqlValue::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(v)?.to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            SqlValue::Real(f) => {
                if *ty == Type::FLOAT4 {
                    (f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlValue::Timestamp(ts) => {
                if *ty == Type::TIMESTAMPTZ {
                    Utc.from_utc_datetime(&ts).to_sql(ty, out)
                } else if *ty == Type::DATE {
                    ts.date().to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
            SqlValue::Json(v) => v.to_sql(ty, out),
            SqlValue::Text(s) => s.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn numeric_param(value: &SqlValue) -> std::result::Result<Decimal, BoxError> {
    match value {
        SqlValue::Int(v) => Ok(Decimal::from(*v)),
        SqlValue::Bool(b) => Ok(Decimal::from(*b as i64)),
        // `Display` for f64 never uses exponent notation
        SqlValue::Real(f) => Ok(Decimal::from_str(&f.to_string())?),
        SqlValue::Text(s) => Ok(Decimal::from_str(s.trim())?),
        other => Err(format!("cannot convert {} value to numeric", other.type_name()).into()),
    }
}

fn numeric_value(column: &str, value: Decimal) -> Result<SqlValue> {
    value.to_f64().map(SqlValue::Real).ok_or_else(|| {
        MigrateError::transfer(column, format!("numeric {} does not fit a real", value))
    })
}

/// Decode one column of a result row.
pub(crate) fn decode_value(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue> {
    let column = &row.columns()[idx];
    let ty = column.type_();
    let err = |e: tokio_postgres::Error| {
        MigrateError::transfer(column.name(), format!("decoding {} value: {}", ty, e))
    };

    let value = match *ty {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(err)?
            .map(SqlValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(err)?
            .map(|v| SqlValue::Int(v as i64)),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(err)?
            .map(|v| SqlValue::Int(v as i64)),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(err)?
            .map(SqlValue::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(err)?
            .map(|v| SqlValue::Real(v as f64)),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(err)?
            .map(SqlValue::Real),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(err)?
            .map(SqlValue::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<Utc>>>(idx)
            .map_err(err)?
            .map(|v| SqlValue::Timestamp(v.naive_utc())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(err)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::Timestamp),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)
            .map_err(err)?
            .map(|v| numeric_value(column.name(), v))
            .transpose()?,
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(idx)
            .map_err(err)?
            .map(|v| SqlValue::Text(v.to_string())),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(err)?
            .map(SqlValue::Json),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(err)?
            .map(SqlValue::Text),
    };

    Ok(value.unwrap_or(SqlValue::Null))
}

/// Decode a whole row.
pub(crate) fn decode_row(row: &tokio_postgres::Row) -> Result<Vec<SqlValue>> {
    (0..row.len()).map(|i| decode_value(row, i)).collect()
}

/// Borrow values as a parameter slice.
pub(crate) fn as_params(values: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_is_narrowed_for_int4() {
        let mut buf = BytesMut::new();
        SqlValue::Int(7).to_sql(&Type::INT4, &mut buf).unwrap();
        assert_eq!(&buf[..], &7i32.to_be_bytes());
    }

    #[test]
    fn test_int_overflowing_int2_is_an_error() {
        let mut buf = BytesMut::new();
        assert!(SqlValue::Int(70_000).to_sql(&Type::INT2, &mut buf).is_err());
    }

    #[test]
    fn test_sqlite_boolean_is_conformed() {
        let mut buf = BytesMut::new();
        SqlValue::Int(1).to_sql(&Type::BOOL, &mut buf).unwrap();
        assert_eq!(&buf[..], &[1u8]);
    }

    #[test]
    fn test_json_text_is_sent_as_jsonb() {
        let mut buf = BytesMut::new();
        SqlValue::Text(r#"{"a":1}"#.into())
            .to_sql(&Type::JSONB, &mut buf)
            .unwrap();
        // JSONB binary format starts with the version byte
        assert_eq!(buf[0], 1);
    }

    #[test]
    fn test_null_is_null() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            SqlValue::Null.to_sql(&Type::INT8, &mut buf).unwrap(),
            IsNull::Yes
        ));
    }

    #[test]
    fn test_unparseable_text_for_integer_fails() {
        let mut buf = BytesMut::new();
        assert!(SqlValue::Text("abc".into())
            .to_sql(&Type::INT8, &mut buf)
            .is_err());
    }

    #[test]
    fn test_logical_for_type() {
        assert_eq!(logical_for_type(&Type::JSONB), Some(LogicalType::Json));
        assert_eq!(logical_for_type(&Type::NUMERIC), Some(LogicalType::Real));
        assert_eq!(logical_for_type(&Type::UUID), Some(LogicalType::Text));
        assert_eq!(logical_for_type(&Type::BYTEA), None);
    }

    fn numeric_bytes(text: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        Decimal::from_str(text)
            .unwrap()
            .to_sql(&Type::NUMERIC, &mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_numeric_parameters() {
        let mut buf = BytesMut::new();
        SqlValue::Text("12.50".into())
            .to_sql(&Type::NUMERIC, &mut buf)
            .unwrap();
        assert_eq!(buf, numeric_bytes("12.50"));

        let mut buf = BytesMut::new();
        SqlValue::Real(2.5).to_sql(&Type::NUMERIC, &mut buf).unwrap();
        assert_eq!(buf, numeric_bytes("2.5"));

        let mut buf = BytesMut::new();
        SqlValue::Int(42).to_sql(&Type::NUMERIC, &mut buf).unwrap();
        assert_eq!(buf, numeric_bytes("42"));

        let mut buf = BytesMut::new();
        assert!(SqlValue::Real(1e30).to_sql(&Type::NUMERIC, &mut buf).is_err());
        assert!(SqlValue::Text("n/a".into())
            .to_sql(&Type::NUMERIC, &mut buf)
            .is_err());
    }

    #[test]
    fn test_numeric_decodes_as_real() {
        assert_eq!(
            numeric_value("price", Decimal::new(25, 1)).unwrap(),
            SqlValue::Real(2.5)
        );
        assert_eq!(
            numeric_value("price", Decimal::from(-7)).unwrap(),
            SqlValue::Real(-7.0)
        );
    }

    #[test]
    fn test_uuid_parameters() {
        let text = "550e8400-e29b-41d4-a716-446655440000";
        let mut buf = BytesMut::new();
        SqlValue::Text(text.into())
            .to_sql(&Type::UUID, &mut buf)
            .unwrap();
        assert_eq!(&buf[..], Uuid::parse_str(text).unwrap().as_bytes());

        let mut buf = BytesMut::new();
        assert!(SqlValue::Text("not-a-uuid".into())
            .to_sql(&Type::UUID, &mut buf)
            .is_err());
    }
}
