//! Core data models shared by discovery, planning and encoding.
//!
//! Introspection produces [`TableRef`], [`ColumnDescriptor`] and
//! [`KeyConstraint`] values; the query executor produces [`RawRow`]s of
//! [`NativeValue`]s; replication state is carried as [`BookmarkValue`]s.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// A table or view reported by the introspection capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Database schema
    pub schema: String,
    /// Table or view name
    pub name: String,
    /// True for views
    pub is_view: bool,
}

impl TableRef {
    /// Creates a reference to a base table.
    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            is_view: false,
        }
    }

    /// Creates a reference to a view.
    pub fn view(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            is_view: true,
        }
    }

    /// Stream identifier, `"{schema}-{name}"`.
    pub fn stream_id(&self) -> String {
        format!("{}-{}", self.schema, self.name)
    }
}

/// Native column metadata as reported by database introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Type name as reported, e.g. `nvarchar` or `decimal`
    pub native_type: String,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Declared length; `-1` means MAX
    pub length: Option<i64>,
    /// Declared decimal precision
    pub precision: Option<u32>,
    /// Declared decimal scale
    pub scale: Option<u32>,
}

impl ColumnDescriptor {
    /// Creates a descriptor with no length, precision or scale.
    pub fn new(name: impl Into<String>, native_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            nullable,
            length: None,
            precision: None,
            scale: None,
        }
    }

    /// Builder method to set the declared length.
    pub fn with_length(mut self, length: i64) -> Self {
        self.length = Some(length);
        self
    }

    /// Builder method to set precision and scale.
    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// Kind of key-bearing constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    /// Primary key constraint
    PrimaryKey,
    /// Unique index
    UniqueIndex,
}

/// A primary key or unique index with its ordered column list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConstraint {
    /// Constraint or index name
    pub name: String,
    /// Primary key or unique index
    pub kind: KeyKind,
    /// Key columns in key order
    pub columns: Vec<String>,
}

impl KeyConstraint {
    /// Creates a primary key constraint.
    pub fn primary_key(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: KeyKind::PrimaryKey,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Creates a unique index constraint.
    pub fn unique_index(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: KeyKind::UniqueIndex,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

/// One fetched cell, in the driver's native representation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    /// SQL NULL
    Null,
    /// `bit`
    Bool(bool),
    /// Integer types
    Int(i64),
    /// `float`, `real`, and decimals too wide for `Decimal`
    Float(f64),
    /// `decimal`, `numeric` and money types
    Decimal(rust_decimal::Decimal),
    /// Character types
    String(String),
    /// Binary types
    Bytes(Vec<u8>),
    /// `uniqueidentifier`
    Uuid(uuid::Uuid),
    /// `date`
    Date(NaiveDate),
    /// `time`
    Time(NaiveTime),
    /// `datetime`, `datetime2`, `smalldatetime`
    DateTime(NaiveDateTime),
    /// `datetimeoffset`
    DateTimeOffset(DateTime<FixedOffset>),
}

impl NativeValue {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts the value into a bookmark, if it can order a replication key.
    ///
    /// Naive timestamps and dates are taken as UTC.
    pub fn to_bookmark(&self) -> Option<BookmarkValue> {
        let utc = FixedOffset::east_opt(0)?;
        match self {
            Self::Int(v) => Some(BookmarkValue::Integer(*v)),
            Self::Float(v) => Some(BookmarkValue::Number(*v)),
            Self::Decimal(v) => BookmarkValue::from_decimal(*v),
            Self::String(v) => Some(BookmarkValue::String(v.clone())),
            Self::Uuid(v) => Some(BookmarkValue::String(v.to_string())),
            Self::Time(v) => Some(BookmarkValue::String(v.format("%H:%M:%S").to_string())),
            Self::Date(v) => v
                .and_hms_opt(0, 0, 0)
                .map(|dt| BookmarkValue::Timestamp(utc.from_utc_datetime(&dt))),
            Self::DateTime(v) => Some(BookmarkValue::Timestamp(utc.from_utc_datetime(v))),
            Self::DateTimeOffset(v) => Some(BookmarkValue::Timestamp(*v)),
            Self::Null | Self::Bool(_) | Self::Bytes(_) => None,
        }
    }
}

/// An ordered row of `(column, value)` pairs as returned by the cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    columns: Vec<(String, NativeValue)>,
}

impl RawRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty row with room for `capacity` columns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    /// Appends a column value.
    pub fn push(&mut self, column: impl Into<String>, value: NativeValue) {
        self.columns.push((column.into(), value));
    }

    /// Builder-style variant of [`RawRow::push`].
    pub fn with(mut self, column: impl Into<String>, value: NativeValue) -> Self {
        self.push(column, value);
        self
    }

    /// Looks up a value by column name.
    pub fn get(&self, column: &str) -> Option<&NativeValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Iterates over columns in cursor order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NativeValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True for a row without columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// An encoded record: a flat, insertion-ordered JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Last-seen value of a replication key.
///
/// Deserialization never yields `Timestamp`; state files store timestamps as
/// strings and the planner parses them once the key's domain is known.
/// Integral values are kept exact at any width a `decimal(38, 0)` key can
/// reach.
#[derive(Debug, Clone, PartialEq)]
pub enum BookmarkValue {
    /// Integral value within `i64`
    Integer(i64),
    /// Integral value outside `i64`
    BigInteger(i128),
    /// Fractional value
    Number(f64),
    /// Text value, or a timestamp not yet parsed
    String(String),
    /// Timestamp with its offset
    Timestamp(DateTime<FixedOffset>),
}

impl BookmarkValue {
    /// Name of the value's domain, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integer(_) | Self::BigInteger(_) => "integer",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Integral bookmark, narrowed to `Integer` when it fits.
    pub fn integer(value: i128) -> Self {
        i64::try_from(value).map_or(Self::BigInteger(value), Self::Integer)
    }

    /// Converts a decimal without rounding integral values.
    ///
    /// Fractional values become `Number`.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let normalized = value.normalize();
        if normalized.scale() == 0 {
            return Some(Self::integer(normalized.mantissa()));
        }
        value.to_f64().map(Self::Number)
    }

    /// The value as an exact integer, for the integral variants.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Integer(v) => Some(i128::from(*v)),
            Self::BigInteger(v) => Some(*v),
            _ => None,
        }
    }

    /// Parses the JSON text of a state value.
    fn from_json_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.starts_with('"') {
            return serde_json::from_str(text).ok().map(Self::String);
        }
        if let Ok(v) = text.parse::<i128>() {
            return Some(Self::integer(v));
        }
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Self::Number)
    }

    /// Parses an RFC 3339 timestamp bookmark.
    pub fn parse_timestamp(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(Self::Timestamp)
    }

    /// Returns true when `self` orders strictly after `other`.
    ///
    /// Values from different domains never compare as greater. Integral
    /// values compare exactly; a fractional value against an integral one
    /// compares as floats.
    #[allow(clippy::cast_precision_loss)]
    pub fn is_after(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_i128(), other.as_i128()) {
            return a > b;
        }
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a > b,
            (Self::Number(a), b) => b.as_i128().is_some_and(|b| *a > b as f64),
            (a, Self::Number(b)) => a.as_i128().is_some_and(|a| a as f64 > *b),
            (Self::String(a), Self::String(b)) => a > b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a > b,
            _ => false,
        }
    }
}

impl std::fmt::Display for BookmarkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::BigInteger(v) => write!(f, "{}", v),
            Self::Number(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl Serialize for BookmarkValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::BigInteger(v) => serializer.serialize_i128(*v),
            Self::Number(v) => serializer.serialize_f64(*v),
            Self::String(v) => serializer.serialize_str(v),
            Self::Timestamp(_) => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for BookmarkValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Raw text keeps integers wider than u64 exact.
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Self::from_json_text(raw.get()).ok_or_else(|| {
            de::Error::custom(format!("unsupported bookmark value {}", raw.get()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id() {
        assert_eq!(TableRef::table("dbo", "users").stream_id(), "dbo-users");
        assert!(TableRef::view("sales", "v_orders").is_view);
    }

    #[test]
    fn test_raw_row_lookup_preserves_order() {
        let row = RawRow::new()
            .with("id", NativeValue::Int(1))
            .with("name", NativeValue::String("a".to_string()))
            .with("deleted_at", NativeValue::Null);

        assert_eq!(row.len(), 3);
        assert_eq!(row.get("id"), Some(&NativeValue::Int(1)));
        assert!(row.get("deleted_at").is_some_and(NativeValue::is_null));
        assert!(row.get("missing").is_none());

        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["id", "name", "deleted_at"]);
    }

    #[test]
    fn test_native_value_to_bookmark() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 30, 0))
            .unwrap();
        let bookmark = NativeValue::DateTime(naive).to_bookmark().unwrap();
        assert_eq!(bookmark.to_string(), "2024-01-01T12:30:00Z");

        assert_eq!(
            NativeValue::Int(42).to_bookmark(),
            Some(BookmarkValue::Integer(42))
        );
        assert_eq!(
            NativeValue::Decimal(Decimal::new(5, 0)).to_bookmark(),
            Some(BookmarkValue::Integer(5))
        );
        assert_eq!(
            NativeValue::Decimal(Decimal::new(500, 2)).to_bookmark(),
            Some(BookmarkValue::Integer(5))
        );
        assert_eq!(
            NativeValue::Decimal(Decimal::new(250, 2)).to_bookmark(),
            Some(BookmarkValue::Number(2.5))
        );
        let wide = Decimal::from_i128_with_scale(10_000_000_000_000_000_001, 0);
        assert_eq!(
            NativeValue::Decimal(wide).to_bookmark(),
            Some(BookmarkValue::BigInteger(10_000_000_000_000_000_001))
        );
        assert_eq!(NativeValue::Null.to_bookmark(), None);
        assert_eq!(NativeValue::Bytes(vec![1, 2]).to_bookmark(), None);
    }

    #[test]
    fn test_bookmark_ordering() {
        let early = BookmarkValue::parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let late = BookmarkValue::parse_timestamp("2024-01-01T01:00:00+00:00").unwrap();
        assert!(late.is_after(&early));
        assert!(!early.is_after(&late));

        assert!(BookmarkValue::Number(2.5).is_after(&BookmarkValue::Integer(2)));
        assert!(BookmarkValue::BigInteger(i128::from(i64::MAX) + 1).is_after(&BookmarkValue::Integer(i64::MAX)));
        // adjacent ids past 2^53 stay distinct
        let low = BookmarkValue::Integer(9_007_199_254_740_993);
        let high = BookmarkValue::Integer(9_007_199_254_740_994);
        assert!(high.is_after(&low));
        assert!(!BookmarkValue::String("b".into()).is_after(&BookmarkValue::Integer(1)));
    }

    #[test]
    fn test_bookmark_serde() {
        let value: BookmarkValue = serde_json::from_str("\"2024-01-01T00:00:00Z\"").unwrap();
        assert_eq!(value, BookmarkValue::String("2024-01-01T00:00:00Z".to_string()));

        let value: BookmarkValue = serde_json::from_str("17").unwrap();
        assert_eq!(value, BookmarkValue::Integer(17));

        let value: BookmarkValue = serde_json::from_str("5.0").unwrap();
        assert_eq!(value, BookmarkValue::Number(5.0));

        let value: BookmarkValue = serde_json::from_str("99999999999999999999999").unwrap();
        assert_eq!(value, BookmarkValue::BigInteger(99_999_999_999_999_999_999_999));
        assert_eq!(serde_json::to_string(&value).unwrap(), "99999999999999999999999");

        assert!(serde_json::from_str::<BookmarkValue>("true").is_err());

        let ts = BookmarkValue::parse_timestamp("2024-03-05T10:00:00+02:00").unwrap();
        assert_eq!(
            serde_json::to_string(&ts).unwrap(),
            "\"2024-03-05T10:00:00+02:00\""
        );
    }
}
