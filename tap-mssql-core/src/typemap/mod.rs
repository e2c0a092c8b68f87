//! Native column type to portable schema type conversion.
//!
//! A [`TypeMappingPolicy`] turns a [`ColumnDescriptor`] into a
//! [`SchemaType`], the JSON Schema fragment describing the column's values
//! once encoded. Two policies exist:
//!
//! - **Basic** keeps the mapping coarse: integers, numbers, booleans and
//!   strings, with date/time formats where the type name implies them.
//! - **Precise** adds exact numeric ranges, string lengths, binary
//!   encodings and formats for every type in the SQL Server vocabulary.
//!
//! Both fall through to the same generic name-based mapping for anything
//! they have no rule for, so mapping is total. [`TypeMappingPolicy::map_strict`]
//! is the variant that refuses unrecognized types instead.

mod bounds;
mod fallback;
mod native;

pub use bounds::{
    decimal_bounds, integer_decimal_bounds, BoundNotation, DecimalBounds, MAX_DECIMAL_PRECISION,
};
pub use native::{NativeType, NativeTypeClass};

use crate::{error::TapError, models::ColumnDescriptor, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

/// SQL Server's default `decimal` precision when none is declared.
const DEFAULT_DECIMAL_PRECISION: u32 = 18;

/// Base64 length of an 8-byte rowversion.
const ROWVERSION_ENCODED_LENGTH: u32 = 12;

/// JSON value type of an encoded column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    /// JSON string
    String,
    /// JSON integer
    Integer,
    /// JSON number
    Number,
    /// JSON boolean
    Boolean,
}

impl JsonType {
    /// Name used in the `type` keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// The `type` keyword: a primary type, optionally unioned with `"null"`.
///
/// Serializes as `"integer"` or `["integer", "null"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSet {
    /// Type of non-null values
    pub primary: JsonType,
    /// Whether `"null"` is allowed
    pub nullable: bool,
}

impl Serialize for TypeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.nullable {
            [self.primary.as_str(), "null"].serialize(serializer)
        } else {
            self.primary.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for TypeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        let names = match Repr::deserialize(deserializer)? {
            Repr::One(name) => vec![name],
            Repr::Many(names) => names,
        };

        let nullable = names.iter().any(|n| n == "null");
        let mut primaries = names.iter().filter(|n| *n != "null");
        let primary = primaries
            .next()
            .ok_or_else(|| de::Error::custom("type must name a non-null type"))?;
        if primaries.next().is_some() {
            return Err(de::Error::custom("type must name a single non-null type"));
        }

        let primary = JsonType::from_name(primary)
            .ok_or_else(|| de::Error::custom(format!("unsupported type '{}'", primary)))?;
        Ok(Self { primary, nullable })
    }
}

/// A `minimum`/`maximum` value, integral or floating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NumericBound {
    /// Exact integer bound, wide enough for `decimal(38, 0)`
    Integer(i128),
    /// Floating bound
    Number(f64),
}

impl NumericBound {
    /// Parses the JSON text of a bound; integer text stays exact.
    fn from_json_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(v) = text.parse::<i128>() {
            return Some(Self::Integer(v));
        }
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Self::Number)
    }
}

impl<'de> Deserialize<'de> for NumericBound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Integers past u64 would otherwise arrive as rounded floats.
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Self::from_json_text(raw.get())
            .ok_or_else(|| de::Error::custom(format!("invalid numeric bound {}", raw.get())))
    }
}

/// String formats attached to mapped types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringFormat {
    /// `HH:MM:SS`
    #[serde(rename = "time")]
    Time,
    /// Hyphenated uuid
    #[serde(rename = "uuid")]
    Uuid,
    /// `YYYY-MM-DD`
    #[serde(rename = "date")]
    Date,
    /// RFC 3339 timestamp
    #[serde(rename = "date-time")]
    DateTime,
}

/// Content encodings for binary columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Standard base64 with padding
    Base64,
}

/// Portable description of one column's encoded values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaType {
    /// `type` keyword
    #[serde(rename = "type")]
    pub json_type: TypeSet,
    /// Lowest allowed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<NumericBound>,
    /// Highest allowed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<NumericBound>,
    /// Longest allowed string
    #[serde(default, rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// String format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<StringFormat>,
    /// Encoding of binary content
    #[serde(default, rename = "contentEncoding", skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<ContentEncoding>,
    /// Media type of binary content
    #[serde(default, rename = "contentMediaType", skip_serializing_if = "Option::is_none")]
    pub content_media_type: Option<String>,
}

impl SchemaType {
    /// Creates a schema type with no constraints.
    pub fn new(primary: JsonType, nullable: bool) -> Self {
        Self {
            json_type: TypeSet { primary, nullable },
            minimum: None,
            maximum: None,
            max_length: None,
            format: None,
            content_encoding: None,
            content_media_type: None,
        }
    }

    /// Integer type bounded by `[minimum, maximum]`.
    pub fn integer_range(minimum: i128, maximum: i128, nullable: bool) -> Self {
        Self {
            minimum: Some(NumericBound::Integer(minimum)),
            maximum: Some(NumericBound::Integer(maximum)),
            ..Self::new(JsonType::Integer, nullable)
        }
    }

    /// Number type bounded by `[minimum, maximum]`.
    pub fn number_range(minimum: f64, maximum: f64, nullable: bool) -> Self {
        Self {
            minimum: Some(NumericBound::Number(minimum)),
            maximum: Some(NumericBound::Number(maximum)),
            ..Self::new(JsonType::Number, nullable)
        }
    }

    /// Builder method to set the string format.
    pub fn with_format(mut self, format: StringFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Builder method to set the maximum length.
    pub fn with_max_length(mut self, max_length: Option<u32>) -> Self {
        self.max_length = max_length;
        self
    }

    /// Builder method to set the content encoding.
    pub fn with_content_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.content_encoding = Some(encoding);
        self
    }

    /// Builder method to set the content media type.
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.content_media_type = Some(media_type.into());
        self
    }

    /// Primary JSON type, ignoring nullability.
    pub fn primary(&self) -> JsonType {
        self.json_type.primary
    }

    /// True when values are timestamps or dates.
    pub fn is_temporal(&self) -> bool {
        matches!(self.format, Some(StringFormat::Date | StringFormat::DateTime))
    }
}

/// Type mapping strategy chosen at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeMappingPolicy {
    /// Coarse types, the default
    #[default]
    Basic,
    /// Exact ranges, lengths and encodings
    Precise,
}

impl TypeMappingPolicy {
    /// Selects the policy from the `hd_jsonschema_types` setting.
    pub fn from_flag(high_definition: bool) -> Self {
        if high_definition {
            Self::Precise
        } else {
            Self::Basic
        }
    }

    /// Maps a column to its schema type.
    ///
    /// Deterministic and total: types without a policy rule, including
    /// unrecognized ones, get the generic mapping.
    ///
    /// # Errors
    /// Returns a type mapping error naming the column when its descriptor is
    /// malformed (empty type name, decimal precision outside `1..=38`).
    ///
    /// # Example
    /// ```rust
    /// use tap_mssql_core::models::ColumnDescriptor;
    /// use tap_mssql_core::typemap::{JsonType, TypeMappingPolicy};
    ///
    /// let column = ColumnDescriptor::new("qty", "tinyint", false);
    /// let schema = TypeMappingPolicy::Precise.map(&column).unwrap();
    /// assert_eq!(schema.primary(), JsonType::Integer);
    /// ```
    pub fn map(self, column: &ColumnDescriptor) -> Result<SchemaType> {
        let native = NativeType::from_descriptor(column)?;
        let mapped = match self {
            Self::Basic => map_basic(&native, column.nullable),
            Self::Precise => map_precise(&native, column.nullable),
        }
        .map_err(|e| {
            let reason = match e {
                TapError::Configuration { message } => message,
                other => other.to_string(),
            };
            TapError::type_mapping(&column.name, native.diagnostic(), reason)
        })?;

        Ok(mapped.unwrap_or_else(|| {
            if native.class == NativeTypeClass::Unrecognized {
                tracing::warn!(
                    "Unrecognized native type '{}' for column '{}', using generic mapping",
                    native.name,
                    column.name
                );
            }
            fallback::generic_schema_type(&native.name, column.nullable)
        }))
    }

    /// Like [`map`](Self::map) but refuses unrecognized native types.
    pub fn map_strict(self, column: &ColumnDescriptor) -> Result<SchemaType> {
        let native = NativeType::from_descriptor(column)?;
        if native.class == NativeTypeClass::Unrecognized {
            return Err(TapError::type_mapping(
                &column.name,
                &native.name,
                "unrecognized native type",
            ));
        }
        self.map(column)
    }
}

fn decimal_scale(native: &NativeType) -> (u32, u32) {
    (
        native.precision.unwrap_or(DEFAULT_DECIMAL_PRECISION),
        native.scale.unwrap_or(0),
    )
}

/// Basic policy rules; `None` defers to the generic mapping.
fn map_basic(native: &NativeType, nullable: bool) -> Result<Option<SchemaType>> {
    use NativeTypeClass as C;

    let mapped = match native.class {
        C::Decimal => {
            let (_, scale) = decimal_scale(native);
            if scale == 0 {
                SchemaType::new(JsonType::Integer, nullable)
            } else {
                SchemaType::new(JsonType::Number, nullable)
            }
        }
        C::Money | C::SmallMoney => SchemaType::new(JsonType::Number, nullable),
        C::Bit => SchemaType::new(JsonType::Boolean, nullable),
        C::RowVersion => SchemaType::new(JsonType::String, nullable),
        _ => return Ok(None),
    };
    Ok(Some(mapped))
}

/// Precise policy rules; `None` defers to the generic mapping.
fn map_precise(native: &NativeType, nullable: bool) -> Result<Option<SchemaType>> {
    use NativeTypeClass as C;

    let string = || SchemaType::new(JsonType::String, nullable);
    let base64 = || string().with_content_encoding(ContentEncoding::Base64);

    let mapped = match native.class {
        C::Char | C::VarChar | C::NChar | C::NVarChar => string().with_max_length(native.length),
        C::Text | C::NText => string(),
        C::Time => string().with_format(StringFormat::Time),
        C::UniqueIdentifier => string().with_format(StringFormat::Uuid),
        C::Xml => string().with_media_type("application/xml"),
        C::Binary | C::VarBinary => base64().with_max_length(native.length),
        C::Image => base64(),
        C::RowVersion => base64().with_max_length(Some(ROWVERSION_ENCODED_LENGTH)),
        C::Bit => SchemaType::new(JsonType::Boolean, nullable),
        C::TinyInt => SchemaType::integer_range(0, 255, nullable),
        C::SmallInt => SchemaType::integer_range(i16::MIN.into(), i16::MAX.into(), nullable),
        C::Int => SchemaType::integer_range(i32::MIN.into(), i32::MAX.into(), nullable),
        C::BigInt => SchemaType::integer_range(i64::MIN.into(), i64::MAX.into(), nullable),
        C::Decimal => {
            let (precision, scale) = decimal_scale(native);
            if scale == 0 {
                let (min, max) = integer_decimal_bounds(precision)?;
                SchemaType::integer_range(min, max, nullable)
            } else {
                let bounds = decimal_bounds(precision, scale)?;
                SchemaType::number_range(bounds.minimum, bounds.maximum, nullable)
            }
        }
        C::SmallMoney => SchemaType::number_range(-214_748.364_8, 214_748.364_7, nullable),
        C::Money => SchemaType::number_range(
            -922_337_203_685_477.580_8,
            922_337_203_685_477.580_7,
            nullable,
        ),
        C::Float if native.precision.is_some_and(|p| p <= 24) => {
            SchemaType::number_range(-3.40e38, 3.40e38, nullable)
        }
        C::Float => SchemaType::number_range(-1.79e308, 1.79e308, nullable),
        C::Real => SchemaType::number_range(-3.40e38, 3.40e38, nullable),
        C::Date
        | C::DateTime
        | C::DateTime2
        | C::SmallDateTime
        | C::DateTimeOffset
        | C::Unrecognized => return Ok(None),
    };
    Ok(Some(mapped))
}
