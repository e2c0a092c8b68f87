//! Driver value conversion.

use crate::{
    error::TapError,
    models::{BookmarkValue, NativeValue, RawRow},
    Result,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{ColumnData, FromSql, Query, Row, numeric::Numeric};

fn temporal<T>(data: &ColumnData<'static>, column: &str) -> Result<NativeValue>
where
    T: for<'a> FromSql<'a>,
    NativeValue: From<T>,
{
    T::from_sql(data)
        .map(|value| value.map_or(NativeValue::Null, NativeValue::from))
        .map_err(|e| TapError::query_error(format!("reading column '{}'", column), e))
}

impl From<NaiveDate> for NativeValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveTime> for NativeValue {
    fn from(value: NaiveTime) -> Self {
        Self::Time(value)
    }
}

impl From<NaiveDateTime> for NativeValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<DateTime<FixedOffset>> for NativeValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::DateTimeOffset(value)
    }
}

/// Decimal when it fits 28 digits of scale and 96 bits of mantissa,
/// float otherwise.
fn numeric(value: Numeric) -> NativeValue {
    match Decimal::try_from_i128_with_scale(value.value(), u32::from(value.scale())) {
        Ok(decimal) => NativeValue::Decimal(decimal),
        Err(_) => NativeValue::Float(f64::from(value)),
    }
}

/// Converts one cell.
pub(super) fn native_value(column: &str, data: ColumnData<'static>) -> Result<NativeValue> {
    let value = match data {
        ColumnData::Bit(v) => v.map_or(NativeValue::Null, NativeValue::Bool),
        ColumnData::U8(v) => v.map_or(NativeValue::Null, |v| NativeValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map_or(NativeValue::Null, |v| NativeValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map_or(NativeValue::Null, |v| NativeValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map_or(NativeValue::Null, NativeValue::Int),
        ColumnData::F32(v) => v.map_or(NativeValue::Null, |v| NativeValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(NativeValue::Null, NativeValue::Float),
        ColumnData::Numeric(v) => v.map_or(NativeValue::Null, numeric),
        ColumnData::String(v) => v.map_or(NativeValue::Null, |s| NativeValue::String(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(NativeValue::Null, NativeValue::Uuid),
        ColumnData::Binary(v) => v.map_or(NativeValue::Null, |b| NativeValue::Bytes(b.into_owned())),
        ColumnData::Xml(v) => v.map_or(NativeValue::Null, |x| {
            NativeValue::String(x.into_owned().into_string())
        }),
        ColumnData::Date(_) => return temporal::<NaiveDate>(&data, column),
        ColumnData::Time(_) => return temporal::<NaiveTime>(&data, column),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            return temporal::<NaiveDateTime>(&data, column);
        }
        ColumnData::DateTimeOffset(_) => return temporal::<DateTime<FixedOffset>>(&data, column),
    };
    Ok(value)
}

/// Converts a fetched row, keeping the result-set column order.
pub(super) fn raw_row(row: Row) -> Result<RawRow> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut raw = RawRow::with_capacity(names.len());
    for (name, data) in names.into_iter().zip(row) {
        let value = native_value(&name, data)?;
        raw.push(name, value);
    }
    Ok(raw)
}

/// Binds a bookmark as the next query parameter.
pub(super) fn bind_bookmark(query: &mut Query<'_>, value: &BookmarkValue) {
    match value {
        BookmarkValue::Integer(v) => query.bind(*v),
        BookmarkValue::BigInteger(v) => query.bind(Numeric::new_with_scale(*v, 0)),
        BookmarkValue::Number(v) => query.bind(*v),
        BookmarkValue::String(v) => query.bind(v.clone()),
        BookmarkValue::Timestamp(v) => query.bind(*v),
    }
}
