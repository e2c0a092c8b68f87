//! Classification of SQL Server native types.
//!
//! Introspection reports a type name plus optional length, precision and
//! scale. [`NativeType`] folds those into a closed class with the attributes
//! the mappers need, keeping the reported name for diagnostics.

use crate::{error::TapError, models::ColumnDescriptor, Result};

/// Closed set of native type classes understood by the mappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeTypeClass {
    /// `char`
    Char,
    /// `varchar`
    VarChar,
    /// `nchar`
    NChar,
    /// `nvarchar`
    NVarChar,
    /// `text`
    Text,
    /// `ntext`
    NText,
    /// `time`
    Time,
    /// `uniqueidentifier`
    UniqueIdentifier,
    /// `xml`
    Xml,
    /// `binary`
    Binary,
    /// `varbinary`
    VarBinary,
    /// `image`
    Image,
    /// `rowversion` or `timestamp`
    RowVersion,
    /// `bit`
    Bit,
    /// `tinyint`
    TinyInt,
    /// `smallint`
    SmallInt,
    /// `int`
    Int,
    /// `bigint`
    BigInt,
    /// `decimal` or `numeric`
    Decimal,
    /// `smallmoney`
    SmallMoney,
    /// `money`
    Money,
    /// `float`
    Float,
    /// `real`
    Real,
    /// `date`
    Date,
    /// `datetime`
    DateTime,
    /// `datetime2`
    DateTime2,
    /// `smalldatetime`
    SmallDateTime,
    /// `datetimeoffset`
    DateTimeOffset,
    /// Any type name outside the vocabulary above
    Unrecognized,
}

impl NativeTypeClass {
    /// Classifies a type name, case-insensitively.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "char" | "character" => Self::Char,
            "varchar" | "character varying" => Self::VarChar,
            "nchar" | "national char" | "national character" => Self::NChar,
            "nvarchar" | "national character varying" | "sysname" => Self::NVarChar,
            "text" => Self::Text,
            "ntext" => Self::NText,
            "time" => Self::Time,
            "uniqueidentifier" => Self::UniqueIdentifier,
            "xml" => Self::Xml,
            "binary" => Self::Binary,
            "varbinary" | "binary varying" => Self::VarBinary,
            "image" => Self::Image,
            "rowversion" | "timestamp" => Self::RowVersion,
            "bit" => Self::Bit,
            "tinyint" => Self::TinyInt,
            "smallint" => Self::SmallInt,
            "int" | "integer" => Self::Int,
            "bigint" => Self::BigInt,
            "decimal" | "numeric" | "dec" => Self::Decimal,
            "smallmoney" => Self::SmallMoney,
            "money" => Self::Money,
            "float" | "double precision" => Self::Float,
            "real" => Self::Real,
            "date" => Self::Date,
            "datetime" => Self::DateTime,
            "datetime2" => Self::DateTime2,
            "smalldatetime" => Self::SmallDateTime,
            "datetimeoffset" => Self::DateTimeOffset,
            _ => Self::Unrecognized,
        }
    }

    /// True for character types that carry a declared length.
    pub fn is_sized_string(self) -> bool {
        matches!(self, Self::Char | Self::VarChar | Self::NChar | Self::NVarChar)
    }

    /// True for types whose declared length is part of the type syntax.
    fn takes_length(self) -> bool {
        self.is_sized_string() || matches!(self, Self::Binary | Self::VarBinary)
    }
}

/// A classified native type with the attributes it was declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeType {
    /// Type family
    pub class: NativeTypeClass,
    /// Type name as reported by the database
    pub name: String,
    /// Declared length; `None` for MAX or when not applicable
    pub length: Option<u32>,
    /// Declared decimal precision
    pub precision: Option<u32>,
    /// Declared decimal scale
    pub scale: Option<u32>,
}

impl NativeType {
    /// Classifies the native type of an introspected column.
    ///
    /// A length of `-1` (or any negative value) means MAX.
    pub fn from_descriptor(column: &ColumnDescriptor) -> Result<Self> {
        let name = column.native_type.trim();
        if name.is_empty() {
            return Err(TapError::type_mapping(
                &column.name,
                &column.native_type,
                "native type name is empty",
            ));
        }

        let length = match column.length {
            Some(len) if len >= 0 => Some(u32::try_from(len).map_err(|_| {
                TapError::type_mapping(&column.name, name, format!("length {} out of range", len))
            })?),
            _ => None,
        };

        Ok(Self {
            class: NativeTypeClass::from_name(name),
            name: name.to_string(),
            length,
            precision: column.precision,
            scale: column.scale,
        })
    }

    /// Parses a type string such as `int`, `decimal(10,2)` or `nvarchar(max)`.
    ///
    /// Arguments are interpreted according to the class: a single argument
    /// is a length for character and binary types and a precision otherwise.
    ///
    /// # Errors
    /// Returns a configuration error for empty names, unbalanced parentheses,
    /// non-numeric arguments or more than two arguments.
    pub fn parse(type_string: &str) -> Result<Self> {
        let invalid =
            |reason: &str| TapError::configuration(format!("Invalid type '{}': {}", type_string, reason));

        let trimmed = type_string.trim();
        let (name, args) = match trimmed.split_once('(') {
            Some((head, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| invalid("unbalanced parentheses"))?;
                if inner.contains(['(', ')']) {
                    return Err(invalid("unbalanced parentheses"));
                }
                (head.trim(), Some(inner))
            }
            None if trimmed.contains(')') => return Err(invalid("unbalanced parentheses")),
            None => (trimmed, None),
        };

        if name.is_empty() {
            return Err(invalid("missing type name"));
        }

        let class = NativeTypeClass::from_name(name);
        let mut native = Self {
            class,
            name: name.to_string(),
            length: None,
            precision: None,
            scale: None,
        };

        let Some(args) = args else {
            return Ok(native);
        };

        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [single] if single.eq_ignore_ascii_case("max") => {
                if !class.takes_length() && class != NativeTypeClass::Unrecognized {
                    return Err(invalid("MAX is only valid for character and binary types"));
                }
            }
            [single] => {
                let value: u32 = single.parse().map_err(|_| invalid("non-numeric argument"))?;
                if class.takes_length() || class == NativeTypeClass::Unrecognized {
                    native.length = Some(value);
                } else {
                    native.precision = Some(value);
                }
            }
            [precision, scale] => {
                native.precision = Some(precision.parse().map_err(|_| invalid("non-numeric precision"))?);
                native.scale = Some(scale.parse().map_err(|_| invalid("non-numeric scale"))?);
            }
            _ => return Err(invalid("too many arguments")),
        }

        Ok(native)
    }

    /// Human-readable type string such as `DECIMAL(10, 2)` or `NVARCHAR(MAX)`.
    ///
    /// Informational only; the mappers never read it back.
    pub fn diagnostic(&self) -> String {
        let name = self.name.to_uppercase();
        match self.class {
            class if class.takes_length() => match self.length {
                Some(len) => format!("{}({})", name, len),
                None => format!("{}(MAX)", name),
            },
            NativeTypeClass::Decimal => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("{}({}, {})", name, p, s),
                (Some(p), None) => format!("{}({})", name, p),
                _ => name,
            },
            NativeTypeClass::Float => match self.precision {
                Some(p) => format!("{}({})", name, p),
                None => name,
            },
            NativeTypeClass::Unrecognized => match (self.length, self.precision, self.scale) {
                (Some(len), _, _) => format!("{}({})", name, len),
                (None, Some(p), Some(s)) => format!("{}({}, {})", name, p, s),
                _ => name,
            },
            _ => name,
        }
    }
}

impl std::str::FromStr for NativeType {
    type Err = TapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let test_cases = [
            ("nvarchar", NativeTypeClass::NVarChar),
            ("NVARCHAR", NativeTypeClass::NVarChar),
            ("numeric", NativeTypeClass::Decimal),
            ("timestamp", NativeTypeClass::RowVersion),
            ("datetimeoffset", NativeTypeClass::DateTimeOffset),
            ("int", NativeTypeClass::Int),
            ("geography", NativeTypeClass::Unrecognized),
            ("sql_variant", NativeTypeClass::Unrecognized),
        ];

        for (name, expected) in test_cases {
            assert_eq!(NativeTypeClass::from_name(name), expected, "Failed for {}", name);
        }
    }

    #[test]
    fn test_from_descriptor_max_length() {
        let column = ColumnDescriptor::new("body", "nvarchar", true).with_length(-1);
        let native = NativeType::from_descriptor(&column).unwrap();
        assert_eq!(native.class, NativeTypeClass::NVarChar);
        assert_eq!(native.length, None);
        assert_eq!(native.diagnostic(), "NVARCHAR(MAX)");

        let column = ColumnDescriptor::new("code", "char", false).with_length(3);
        let native = NativeType::from_descriptor(&column).unwrap();
        assert_eq!(native.length, Some(3));
        assert_eq!(native.diagnostic(), "CHAR(3)");
    }

    #[test]
    fn test_from_descriptor_rejects_empty_name() {
        let column = ColumnDescriptor::new("mystery", "  ", true);
        let error = NativeType::from_descriptor(&column).unwrap_err();
        assert!(error.is_configuration());
        assert!(error.to_string().contains("mystery"));
    }

    #[test]
    fn test_parse_type_strings() {
        let native: NativeType = "decimal(10,2)".parse().unwrap();
        assert_eq!(native.class, NativeTypeClass::Decimal);
        assert_eq!((native.precision, native.scale), (Some(10), Some(2)));
        assert_eq!(native.diagnostic(), "DECIMAL(10, 2)");

        let native = NativeType::parse("nvarchar(max)").unwrap();
        assert_eq!(native.length, None);

        let native = NativeType::parse("varchar( 50 )").unwrap();
        assert_eq!(native.length, Some(50));

        let native = NativeType::parse("float(24)").unwrap();
        assert_eq!(native.precision, Some(24));

        let native = NativeType::parse("INT").unwrap();
        assert_eq!(native.class, NativeTypeClass::Int);
        assert_eq!(native.diagnostic(), "INT");
    }

    #[test]
    fn test_parse_malformed_type_strings() {
        for input in ["", "()", "decimal(10,2", "decimal)", "varchar(abc)", "decimal(1,2,3)", "int(max)", "a(b(c))"] {
            let result = NativeType::parse(input);
            assert!(result.is_err(), "Expected error for {:?}", input);
            assert!(result.unwrap_err().is_configuration());
        }
    }
}
