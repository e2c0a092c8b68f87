//! Numeric bounds for fixed-precision decimal columns.
//!
//! The largest value a `decimal(P, S)` column holds is P nines with the
//! decimal point S places from the right. When that literal cannot be
//! represented faithfully as an `f64`, the bound is reported in scientific
//! notation instead so that it still bounds every stored value.

use crate::{error::TapError, Result};

/// Highest precision SQL Server accepts for `decimal`/`numeric`.
pub const MAX_DECIMAL_PRECISION: u32 = 38;

/// Notation the reported bounds were derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundNotation {
    /// Plain digits, e.g. `999.99`
    Literal,
    /// Rounded up, e.g. `9.99e+5`
    Scientific,
}

/// Symmetric bounds of a fractional decimal column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecimalBounds {
    /// Lowest value, the negated maximum
    pub minimum: f64,
    /// Highest value
    pub maximum: f64,
    /// How the maximum was derived
    pub notation: BoundNotation,
}

fn check_precision(precision: u32, scale: u32) -> Result<()> {
    if !(1..=MAX_DECIMAL_PRECISION).contains(&precision) {
        return Err(TapError::configuration(format!(
            "decimal precision must be between 1 and {}, got {}",
            MAX_DECIMAL_PRECISION, precision
        )));
    }
    if scale > precision {
        return Err(TapError::configuration(format!(
            "decimal scale {} exceeds precision {}",
            scale, precision
        )));
    }
    Ok(())
}

/// Literal maximum, e.g. `999.99` for (5, 2) or `0.999` for (3, 3).
fn literal_max(precision: u32, scale: u32) -> String {
    let integer_digits = precision.saturating_sub(scale) as usize;
    let fraction = "9".repeat(scale as usize);
    if integer_digits == 0 {
        format!("0.{}", fraction)
    } else {
        format!("{}.{}", "9".repeat(integer_digits), fraction)
    }
}

/// Scientific maximum, e.g. `9.99e+5` for (5, 2).
fn scientific_max(precision: u32, scale: u32) -> String {
    format!("9.{}e+{}", "9".repeat(scale as usize), precision)
}

fn leading_significant_digit(rendered: &str) -> Option<char> {
    rendered.chars().find(|c| matches!(c, '1'..='9'))
}

fn parse_bound(text: &str) -> Result<f64> {
    text.parse::<f64>()
        .map_err(|e| TapError::configuration(format!("invalid decimal bound '{}': {}", text, e)))
}

/// Bounds of a `decimal(P, S)` column with `S != 0`.
///
/// The literal maximum is parsed as a float and rendered back. If the
/// rendering switches to an exponent or its leading significant digit moved
/// (the value rounded up to the next power of ten), the scientific bounds
/// are reported; otherwise the literal bounds are.
///
/// # Errors
/// Precision outside `1..=38` or scale greater than precision.
///
/// # Example
/// ```rust
/// use tap_mssql_core::typemap::{decimal_bounds, BoundNotation};
///
/// let bounds = decimal_bounds(5, 2).unwrap();
/// assert_eq!(bounds.maximum, 999.99);
/// assert_eq!(bounds.minimum, -999.99);
/// assert_eq!(bounds.notation, BoundNotation::Literal);
/// ```
pub fn decimal_bounds(precision: u32, scale: u32) -> Result<DecimalBounds> {
    check_precision(precision, scale)?;

    let literal = literal_max(precision, scale);
    let parsed = parse_bound(&literal)?;
    let rendered = format!("{:?}", parsed);

    let faithful = !rendered.contains(['e', 'E'])
        && leading_significant_digit(&rendered) == leading_significant_digit(&literal);

    let (maximum, notation) = if faithful {
        (parsed, BoundNotation::Literal)
    } else {
        (
            parse_bound(&scientific_max(precision, scale))?,
            BoundNotation::Scientific,
        )
    };

    Ok(DecimalBounds {
        minimum: -maximum,
        maximum,
        notation,
    })
}

/// Integer bounds of a `decimal(P, 0)` column: `±(10^P - 1)`.
///
/// # Errors
/// Precision outside `1..=38`.
pub fn integer_decimal_bounds(precision: u32) -> Result<(i128, i128)> {
    check_precision(precision, 0)?;
    let max = 10_i128
        .checked_pow(precision)
        .map(|v| v.saturating_sub(1))
        .ok_or_else(|| TapError::configuration(format!("precision {} overflows", precision)))?;
    Ok((max.saturating_neg(), max))
}
