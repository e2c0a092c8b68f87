//! Conversion of fetched rows into JSON records.
//!
//! Each [`NativeValue`] variant has exactly one encoding:
//!
//! | value | encoded as |
//! |---|---|
//! | date | `YYYY-MM-DD` |
//! | naive timestamp | `YYYY-MM-DDTHH:MM:SS[.ffffff]` |
//! | timestamp with offset | `YYYY-MM-DDTHH:MM:SS[.ffffff]+HH:MM` |
//! | time | `HH:MM:SS`, fractional seconds dropped |
//! | bytes | standard base64 |
//! | decimal | JSON integer at scale 0, JSON number otherwise |
//! | uuid | lowercase hyphenated string |
//!
//! Values that are already strings pass through untouched.

use crate::{
    catalog::CatalogEntry,
    models::{NativeValue, RawRow, Record},
};
use base64::Engine;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde_json::Value;

fn format_naive_timestamp(value: &NaiveDateTime) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn format_offset_timestamp(value: &DateTime<FixedOffset>) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string()
    }
}

fn finite_number(value: f64, column: &str) -> Value {
    match serde_json::Number::from_f64(value) {
        Some(number) => Value::Number(number),
        None => {
            tracing::warn!("Non-finite value in column '{}' encoded as null", column);
            Value::Null
        }
    }
}

fn encode_decimal(column: &str, value: &Decimal) -> Value {
    if value.scale() == 0 {
        if let Some(integer) = value.to_i64() {
            return Value::from(integer);
        }
        if let Some(integer) = value.to_u64() {
            return Value::from(integer);
        }
    }
    match value.to_f64() {
        Some(f) => finite_number(f, column),
        None => {
            tracing::warn!("Decimal in column '{}' does not fit a double, encoded as null", column);
            Value::Null
        }
    }
}

/// Encodes one value.
pub fn encode_value(column: &str, value: &NativeValue) -> Value {
    match value {
        NativeValue::Null => Value::Null,
        NativeValue::Bool(v) => Value::Bool(*v),
        NativeValue::Int(v) => Value::from(*v),
        NativeValue::Float(v) => finite_number(*v, column),
        NativeValue::Decimal(v) => encode_decimal(column, v),
        NativeValue::String(v) => Value::String(v.clone()),
        NativeValue::Bytes(v) => Value::String(base64::engine::general_purpose::STANDARD.encode(v)),
        NativeValue::Uuid(v) => Value::String(v.hyphenated().to_string()),
        NativeValue::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
        NativeValue::Time(v) => Value::String(v.format("%H:%M:%S").to_string()),
        NativeValue::DateTime(v) => Value::String(format_naive_timestamp(v)),
        NativeValue::DateTimeOffset(v) => Value::String(format_offset_timestamp(v)),
    }
}

/// Encodes rows for one stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordEncoder;

impl RecordEncoder {
    /// Creates an encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encodes a row into a record, keeping only fields the stream declares.
    ///
    /// Fields keep cursor order.
    pub fn encode(&self, row: &RawRow, entry: &CatalogEntry) -> Record {
        let mut record = Record::new();
        for (column, value) in row.iter() {
            if !entry.schema.properties.contains(column) {
                tracing::debug!(
                    "Dropping field '{}' not declared by stream {}",
                    column,
                    entry.tap_stream_id
                );
                continue;
            }
            record.insert(column.to_string(), encode_value(column, value));
        }
        record
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        catalog::CatalogBuilder,
        models::{ColumnDescriptor, TableRef},
        typemap::TypeMappingPolicy,
    };
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use serde_json::json;
    use std::str::FromStr;

    fn naive(h: u32, m: u32, s: u32, micro: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(h, m, s, micro)
            .unwrap()
    }

    #[test]
    fn test_temporal_encodings() {
        assert_eq!(
            encode_value("d", &NativeValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())),
            json!("2024-02-29")
        );
        assert_eq!(
            encode_value("ts", &NativeValue::DateTime(naive(13, 5, 9, 0))),
            json!("2024-02-29T13:05:09")
        );
        assert_eq!(
            encode_value("ts", &NativeValue::DateTime(naive(13, 5, 9, 120))),
            json!("2024-02-29T13:05:09.000120")
        );

        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        let value = offset.from_local_datetime(&naive(8, 0, 0, 0)).unwrap();
        assert_eq!(
            encode_value("ts", &NativeValue::DateTimeOffset(value)),
            json!("2024-02-29T08:00:00+05:30")
        );

        let time = NaiveTime::from_hms_micro_opt(23, 59, 58, 999_999).unwrap();
        assert_eq!(encode_value("t", &NativeValue::Time(time)), json!("23:59:58"));
    }

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(encode_value("b", &NativeValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])), json!("3q2+7w=="));
        assert_eq!(
            encode_value("d", &NativeValue::Decimal(Decimal::from_str("123.45").unwrap())),
            json!(123.45)
        );
        assert_eq!(encode_value("d", &NativeValue::Decimal(Decimal::new(42, 0))), json!(42));
        let wide = Decimal::from_i128_with_scale(10_000_000_000_000_000_001, 0);
        assert_eq!(encode_value("d", &NativeValue::Decimal(wide)), json!(10_000_000_000_000_000_001_u64));
        let id = uuid::Uuid::from_str("6F9619FF-8B86-D011-B42D-00C04FC964FF").unwrap();
        assert_eq!(
            encode_value("u", &NativeValue::Uuid(id)),
            json!("6f9619ff-8b86-d011-b42d-00c04fc964ff")
        );
        assert_eq!(encode_value("n", &NativeValue::Null), Value::Null);
        assert_eq!(encode_value("i", &NativeValue::Int(-7)), json!(-7));
        assert_eq!(encode_value("f", &NativeValue::Bool(true)), json!(true));
    }

    #[test]
    fn test_non_finite_floats_become_null() {
        assert_eq!(encode_value("f", &NativeValue::Float(f64::NAN)), Value::Null);
        assert_eq!(encode_value("f", &NativeValue::Float(f64::INFINITY)), Value::Null);
    }

    #[test]
    fn test_strings_pass_through() {
        let value = NativeValue::String("2024-02-29T13:05:09".to_string());
        assert_eq!(encode_value("ts", &value), json!("2024-02-29T13:05:09"));
    }

    #[test]
    fn test_encode_drops_undeclared_fields() {
        let columns = vec![
            ColumnDescriptor::new("id", "int", false),
            ColumnDescriptor::new("payload", "varbinary", true).with_length(-1),
        ];
        let entry = CatalogBuilder::new(TypeMappingPolicy::Precise)
            .build_entry(&TableRef::table("dbo", "blobs"), &columns, &[])
            .unwrap();

        let row = RawRow::new()
            .with("id", NativeValue::Int(1))
            .with("extra", NativeValue::String("x".to_string()))
            .with("payload", NativeValue::Bytes(b"hi".to_vec()));

        let record = RecordEncoder::new().encode(&row, &entry);
        assert_eq!(Value::Object(record), json!({"id": 1, "payload": "aGk="}));
    }
}
