//! Settlement Error Types
//!
//! One error type flows through every component. Repository failures carry the
//! operation name and affected id so the task framework can report how far a run got.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nacha::CodecError;

#[derive(Error, Debug, Clone)]
pub enum SettlementError {
    // === Validation ===
    #[error("Validation failed: {0}")]
    Validation(String),

    // === Infrastructure ===
    #[error("Database error: {0}")]
    Database(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),

    // === Data ===
    #[error("Settlement file codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{op} failed for {id}: {source}")]
    Context {
        op: &'static str,
        id: String,
        source: Box<SettlementError>,
    },
}

impl SettlementError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::Validation(_) => "VALIDATION_ERROR",
            SettlementError::Database(_) => "DATABASE_ERROR",
            SettlementError::Bus(_) => "BUS_ERROR",
            SettlementError::Blob(_) => "BLOB_ERROR",
            SettlementError::Cipher(_) => "CIPHER_ERROR",
            SettlementError::Cancelled => "CANCELLED",
            SettlementError::Io(_) => "IO_ERROR",
            SettlementError::Codec(_) => "CODEC_ERROR",
            SettlementError::Serialization(_) => "SERIALIZATION_ERROR",
            SettlementError::NotFound(_) => "NOT_FOUND",
            SettlementError::Duplicate(_) => "DUPLICATE",
            SettlementError::InvalidState(_) => "INVALID_STATE",
            SettlementError::Config(_) => "CONFIG_ERROR",
            SettlementError::Context { source, .. } => source.code(),
        }
    }

    /// Infrastructure failures leave state untouched and are retried by the next scheduled run.
    pub fn is_transient(&self) -> bool {
        match self {
            SettlementError::Database(_)
            | SettlementError::Bus(_)
            | SettlementError::Blob(_)
            | SettlementError::Io(_) => true,
            SettlementError::Context { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Wrap with the failing operation and the id it was working on.
    pub fn context(self, op: &'static str, id: impl ToString) -> Self {
        SettlementError::Context {
            op,
            id: id.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SettlementError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        SettlementError::Database(format!("migration failed: {}", e))
    }
}

impl From<serde_json::Error> for SettlementError {
    fn from(e: serde_json::Error) -> Self {
        SettlementError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for SettlementError {
    fn from(e: std::io::Error) -> Self {
        SettlementError::Io(e.to_string())
    }
}

/// Structured error handed back to the task framework
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl From<&SettlementError> for TaskError {
    fn from(e: &SettlementError) -> Self {
        Self {
            error_type: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;

/// A counted run that stopped early. `processed` is how far it got.
#[derive(Error, Debug, Clone)]
#[error("{error} (after {processed} records)")]
pub struct PartialFailure {
    pub processed: usize,
    pub error: SettlementError,
}

impl PartialFailure {
    pub fn new(processed: usize, error: SettlementError) -> Self {
        Self { processed, error }
    }
}

/// Result of an operation that reports a processed-record count either way
pub type CountedResult = Result<usize, PartialFailure>;
