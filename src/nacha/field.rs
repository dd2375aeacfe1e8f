//! Fixed-width field formatting
//!
//! Alphanumeric fields are left-justified and space-filled, numeric fields are
//! right-justified and zero-filled. Every field is exactly its width in bytes.

use rust_decimal::Decimal;

use super::error::CodecError;
use crate::money;

/// Left-justify, space-fill and truncate to `width`. Non-ASCII characters become spaces
/// so the byte width always equals the character width.
pub fn alpha(value: &str, width: usize) -> String {
    let mut out: String = value
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { ' ' })
        .take(width)
        .collect();
    while out.len() < width {
        out.push(' ');
    }
    out
}

/// Right-justify and zero-fill a digit string. Overflow is an error, never a silent cut.
pub fn numeric(field: &'static str, digits: &str, width: usize) -> Result<String, CodecError> {
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CodecError::NotNumeric {
            field,
            value: digits.to_string(),
        });
    }
    if digits.len() > width {
        return Err(CodecError::FieldOverflow {
            field,
            width,
            value: digits.to_string(),
        });
    }
    Ok(format!("{:0>width$}", digits, width = width))
}

/// ABA routing number: exactly nine ASCII digits, check digit included.
pub fn routing_number(value: &str) -> Result<&str, CodecError> {
    if value.len() == 9 && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(value)
    } else {
        Err(CodecError::InvalidField {
            field: "routing_number",
            value: value.to_string(),
        })
    }
}

pub fn numeric_u64(field: &'static str, value: u64, width: usize) -> Result<String, CodecError> {
    numeric(field, &value.to_string(), width)
}

/// Keep only the low-order `width` digits. Used for hash totals that may exceed the field.
pub fn numeric_low_order(value: u64, width: usize) -> String {
    let digits = value.to_string();
    let start = digits.len().saturating_sub(width);
    format!("{:0>width$}", &digits[start..], width = width)
}

/// Amount as zero-filled cents, decimal point removed.
pub fn amount(field: &'static str, value: Decimal, width: usize) -> Result<String, CodecError> {
    let digits = money::cents_digits(value)?;
    numeric(field, &digits, width)
}

/// Right-justify and space-fill, used for the immediate destination/origin routing fields.
pub fn right_justified(field: &'static str, value: &str, width: usize) -> Result<String, CodecError> {
    let value = value.trim();
    if value.len() > width {
        return Err(CodecError::FieldOverflow {
            field,
            width,
            value: value.to_string(),
        });
    }
    Ok(format!("{:>width$}", value, width = width))
}

// ============================================================================
// Parsing helpers
// ============================================================================

pub fn slice<'a>(line: &'a str, start: usize, end: usize) -> &'a str {
    &line[start..end]
}

pub fn parse_u64(field: &'static str, raw: &str) -> Result<u64, CodecError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed.parse::<u64>().map_err(|_| CodecError::NotNumeric {
        field,
        value: raw.to_string(),
    })
}

pub fn parse_cents(field: &'static str, raw: &str) -> Result<Decimal, CodecError> {
    let cents = parse_u64(field, raw)?;
    let cents = i64::try_from(cents).map_err(|_| CodecError::FieldOverflow {
        field,
        width: raw.len(),
        value: raw.to_string(),
    })?;
    Ok(Decimal::new(cents, 2))
}
