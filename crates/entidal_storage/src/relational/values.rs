//! Conversion between entity values and SQLite column values.
//!
//! Scalars map onto native column types (booleans as 0/1, dates as epoch
//! millis). Nested, multi-valued and binary fields are stored as
//! type-tagged envelope text.

use crate::error::StorageResult;
use crate::meta::{FieldMeta, FieldType};
use entidal_codec::{from_envelope_str, to_envelope_string, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Converts a value for binding into the column of `field`.
pub(crate) fn to_sql(field: Option<&FieldMeta>, value: &Value) -> StorageResult<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    if field.is_some_and(FieldMeta::is_enveloped) {
        return Ok(SqlValue::Text(to_envelope_string(value)?));
    }
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(n) | Value::Date(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) | Value::ObjectId(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Array(_) | Value::Map(_) => SqlValue::Text(to_envelope_string(value)?),
    })
}

/// Converts a column value back using the declared type of `field`.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn from_sql(field: Option<&FieldMeta>, raw: ValueRef<'_>) -> StorageResult<Value> {
    let field_type = field.map(|f| f.field_type);
    if let (Some(meta), ValueRef::Text(bytes)) = (field, raw) {
        if meta.is_enveloped() {
            return Ok(from_envelope_str(&String::from_utf8_lossy(bytes))?);
        }
    }
    Ok(match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => match field_type {
            Some(FieldType::Boolean) => Value::Bool(n != 0),
            Some(FieldType::Date | FieldType::DateTime) => Value::Date(n),
            Some(FieldType::Float) => Value::Float(n as f64),
            _ => Value::Integer(n),
        },
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            match field_type {
                Some(FieldType::ObjectId) => Value::ObjectId(text),
                _ => Value::Text(text),
            }
        }
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    })
}
