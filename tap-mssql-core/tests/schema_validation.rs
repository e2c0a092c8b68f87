//! Encoded records must validate against the schema discovered for them.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::Value;
use tap_mssql_core::{
    models::{ColumnDescriptor, NativeValue, RawRow, TableRef},
    typemap::{decimal_bounds, integer_decimal_bounds, BoundNotation, MAX_DECIMAL_PRECISION},
    CatalogBuilder, CatalogEntry, RecordEncoder, TypeMappingPolicy,
};

fn ledger_entry(policy: TypeMappingPolicy) -> CatalogEntry {
    let columns = vec![
        ColumnDescriptor::new("entry_id", "int", false),
        ColumnDescriptor::new("qty", "tinyint", true),
        ColumnDescriptor::new("amount", "decimal", true).with_precision(10, 2),
        ColumnDescriptor::new("units", "numeric", true).with_precision(9, 0),
        ColumnDescriptor::new("memo", "nvarchar", true).with_length(10),
        ColumnDescriptor::new("posted", "bit", false),
        ColumnDescriptor::new("signature", "varbinary", true).with_length(16),
    ];
    CatalogBuilder::new(policy)
        .build_entry(&TableRef::table("acct", "ledger"), &columns, &[])
        .unwrap()
}

fn validator(entry: &CatalogEntry) -> jsonschema::Validator {
    let schema = serde_json::to_value(&entry.schema).unwrap();
    jsonschema::validator_for(&schema).unwrap()
}

fn encode(entry: &CatalogEntry, row: &RawRow) -> Value {
    Value::Object(RecordEncoder::new().encode(row, entry))
}

fn ledger_row(id: i64) -> RawRow {
    RawRow::new()
        .with("entry_id", NativeValue::Int(id))
        .with("qty", NativeValue::Int(255))
        .with("amount", NativeValue::Decimal(Decimal::new(-99_999_999, 2)))
        .with("units", NativeValue::Decimal(Decimal::new(123_456_789, 0)))
        .with("memo", NativeValue::String("ten chars!".to_string()))
        .with("posted", NativeValue::Bool(true))
        .with("signature", NativeValue::Bytes(vec![0xab; 12]))
}

#[test]
fn test_records_validate_against_both_policies() {
    for policy in [TypeMappingPolicy::Basic, TypeMappingPolicy::Precise] {
        let entry = ledger_entry(policy);
        let validator = validator(&entry);

        let record = encode(&entry, &ledger_row(1));
        assert!(validator.is_valid(&record), "{:?} rejected {}", policy, record);

        let nulls = RawRow::new()
            .with("entry_id", NativeValue::Int(2))
            .with("qty", NativeValue::Null)
            .with("amount", NativeValue::Null)
            .with("units", NativeValue::Null)
            .with("memo", NativeValue::Null)
            .with("posted", NativeValue::Bool(false))
            .with("signature", NativeValue::Null);
        assert!(validator.is_valid(&encode(&entry, &nulls)), "{:?} rejected nulls", policy);
    }
}

#[test]
fn test_precise_schema_rejects_out_of_range_values() {
    let entry = ledger_entry(TypeMappingPolicy::Precise);
    let validator = validator(&entry);

    let too_many = ledger_row(1).with("qty", NativeValue::Int(256));
    assert!(!validator.is_valid(&encode(&entry, &too_many)));

    let too_long = ledger_row(1).with("memo", NativeValue::String("eleven chars".to_string()));
    assert!(!validator.is_valid(&encode(&entry, &too_long)));

    let not_null = ledger_row(1).with("posted", NativeValue::Null);
    assert!(!validator.is_valid(&encode(&entry, &not_null)));
}

proptest! {
    #[test]
    fn prop_integer_decimal_bounds_are_all_nines(precision in 1u32..=MAX_DECIMAL_PRECISION) {
        let (minimum, maximum) = integer_decimal_bounds(precision).unwrap();
        prop_assert_eq!(minimum, -maximum);
        prop_assert_eq!(maximum.to_string(), "9".repeat(precision as usize));
    }

    #[test]
    fn prop_decimal_bounds_are_symmetric_and_cover_magnitude(
        precision in 1u32..=MAX_DECIMAL_PRECISION,
        scale_seed in 1u32..=MAX_DECIMAL_PRECISION,
    ) {
        let scale = 1 + (scale_seed - 1) % precision;
        let bounds = decimal_bounds(precision, scale).unwrap();

        prop_assert_eq!(bounds.minimum, -bounds.maximum);
        prop_assert!(bounds.maximum > 0.0);
        let magnitude = 10f64.powi(i32::try_from(precision - scale).unwrap());
        match bounds.notation {
            BoundNotation::Literal => prop_assert!(bounds.maximum < magnitude),
            BoundNotation::Scientific => prop_assert!(bounds.maximum >= magnitude),
        }
    }
}
