//! Generic name-based mapping used when no policy rule applies.

use super::{JsonType, SchemaType, StringFormat};

/// Maps a native type name to a coarse schema type.
///
/// Works on the lowercased name only and never fails; anything that does
/// not look numeric, boolean or temporal becomes a plain string.
pub(crate) fn generic_schema_type(type_name: &str, nullable: bool) -> SchemaType {
    let name = type_name.trim().to_lowercase();

    if name.contains("int") && !name.contains("interval") && name != "point" {
        return SchemaType::new(JsonType::Integer, nullable);
    }

    match name.as_str() {
        "decimal" | "numeric" | "dec" | "float" | "real" | "double" | "double precision"
        | "money" | "smallmoney" => SchemaType::new(JsonType::Number, nullable),
        "bit" | "bool" | "boolean" => SchemaType::new(JsonType::Boolean, nullable),
        "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset"
        | "timestamp with time zone" | "timestamptz" => {
            SchemaType::new(JsonType::String, nullable).with_format(StringFormat::DateTime)
        }
        "date" => SchemaType::new(JsonType::String, nullable).with_format(StringFormat::Date),
        "time" => SchemaType::new(JsonType::String, nullable).with_format(StringFormat::Time),
        _ => SchemaType::new(JsonType::String, nullable),
    }
}
