use thiserror::Error;

use crate::money::MoneyError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Field {field} overflows width {width}: {value:?}")]
    FieldOverflow {
        field: &'static str,
        width: usize,
        value: String,
    },

    #[error("Field {field} must be numeric: {value:?}")]
    NotNumeric { field: &'static str, value: String },

    #[error("Invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("Invalid amount: {0}")]
    Amount(#[from] MoneyError),

    #[error("Record must be {expected} characters, got {actual}")]
    LineLength { expected: usize, actual: usize },

    #[error("Unknown record type: {0:?}")]
    UnknownRecordType(char),

    #[error("A settlement file needs at least one entry")]
    EmptyBatch,
}
