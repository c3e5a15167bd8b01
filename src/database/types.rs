//! SQL Server value extraction and rendering.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tiberius::Row;
use uuid::Uuid;

/// A SQL value decoded from a result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Render for tool output. NULL renders as the literal `NULL`.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I16(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F32(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::String(v) => v.clone(),
            SqlValue::Bytes(v) => format!("0x{}", hex::encode(v)),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Date(v) => v.to_string(),
            SqlValue::Time(v) => v.to_string(),
            SqlValue::DateTime(v) => v.to_string(),
            SqlValue::DateTimeUtc(v) => v.to_rfc3339(),
        }
    }
}

/// Extract a value from a row column, trying types in order of likelihood.
pub fn extract_column(row: &Row, idx: usize) -> SqlValue {
    if row.columns().get(idx).is_none() {
        return SqlValue::Null;
    }

    if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
        return SqlValue::String(v.to_string());
    }
    if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
        return SqlValue::I32(v);
    }
    if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
        return SqlValue::I64(v);
    }
    if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
        return SqlValue::I16(v);
    }
    // TINYINT surfaces as u8
    if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
        return SqlValue::I16(i16::from(v));
    }
    if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
        return SqlValue::F64(v);
    }
    if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
        return SqlValue::F32(v);
    }
    if let Some(v) = row.try_get::<Decimal, _>(idx).ok().flatten() {
        return SqlValue::Decimal(v);
    }
    if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
        return SqlValue::Bool(v);
    }
    if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
        return SqlValue::Uuid(v);
    }
    if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
        return SqlValue::DateTime(v);
    }
    if let Some(v) = row.try_get::<DateTime<Utc>, _>(idx).ok().flatten() {
        return SqlValue::DateTimeUtc(v);
    }
    if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
        return SqlValue::Date(v);
    }
    if let Some(v) = row.try_get::<NaiveTime, _>(idx).ok().flatten() {
        return SqlValue::Time(v);
    }
    if let Some(v) = row.try_get::<&[u8], _>(idx).ok().flatten() {
        return SqlValue::Bytes(v.to_vec());
    }

    SqlValue::Null
}
