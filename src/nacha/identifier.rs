//! Settlement identifiers
//!
//! `YYMMDD` + last 8 digits of the source id (zero-filled) + kind code, left-filled with
//! zeros to the requested width. Computed once in PreProcess and persisted, never re-derived.

use chrono::NaiveDate;

/// Width of the entry-detail individual id field
pub const SETTLEMENT_ID_WIDTH: usize = 15;

const ID_MODULUS: u64 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementKind {
    Consolidated,
    Individual,
}

impl SettlementKind {
    pub fn code(&self) -> char {
        match self {
            SettlementKind::Consolidated => 'C',
            SettlementKind::Individual => 'P',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'C' => Some(SettlementKind::Consolidated),
            'P' => Some(SettlementKind::Individual),
            _ => None,
        }
    }

    /// Classify an identifier by its trailing kind code.
    pub fn of_identifier(identifier: &str) -> Option<Self> {
        identifier.trim().chars().last().and_then(Self::from_code)
    }
}

/// Derive the settlement identifier for a consolidated or individual record.
///
/// Pure in `(id, width, kind, date)`.
pub fn settlement_identifier(id: i64, width: usize, kind: SettlementKind, date: NaiveDate) -> String {
    let suffix = id.unsigned_abs() % ID_MODULUS;
    let core = format!("{}{:08}{}", date.format("%y%m%d"), suffix, kind.code());
    format!("{:0>width$}", core, width = width)
}
