//! Core settlement types
//!
//! Status and type codes are persisted as SMALLINT and travel as integers on the bus,
//! so every enum keeps an explicit, stable id.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a closed enum with fixed i16 wire ids plus the conversions every code needs.
macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $id:literal => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(into = "i16", try_from = "i16")]
        #[repr(i16)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $id, )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            #[inline]
            pub fn id(&self) -> i16 {
                *self as i16
            }

            pub fn from_id(id: i16) -> Option<Self> {
                match id {
                    $( $id => Some($name::$variant), )+
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl From<$name> for i16 {
            fn from(value: $name) -> i16 {
                value.id()
            }
        }

        impl TryFrom<i16> for $name {
            type Error = String;

            fn try_from(value: i16) -> Result<Self, Self::Error> {
                $name::from_id(value)
                    .ok_or_else(|| format!("invalid {} id: {}", stringify!($name), value))
            }
        }
    };
}

coded_enum! {
    /// Lifecycle shared by execution and consolidated requests.
    ///
    /// ```text
    /// NEW → ACCEPTED → IN_PROGRESS → COMPLETED
    ///   ↘ CONSOLIDATED (execution requests folded into a batch) → COMPLETED
    /// ERRORED reachable from any non-terminal state
    /// ```
    pub enum PaymentStatus {
        New = 0 => "NEW",
        Accepted = 10 => "ACCEPTED",
        Consolidated = 15 => "CONSOLIDATED",
        InProgress = 20 => "IN_PROGRESS",
        Completed = 30 => "COMPLETED",
        Errored = -10 => "ERRORED",
    }
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Errored)
    }

    /// A consolidated batch can still absorb new members.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::New | PaymentStatus::Accepted)
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (from, Errored) => !from.is_terminal(),
            (New, Accepted | Consolidated | InProgress) => true,
            (Accepted, Consolidated | InProgress) => true,
            // Individual row whose SentToBank publish failed goes back to its prior status
            (InProgress, New | Accepted) => true,
            (InProgress | Consolidated, Completed) => true,
            _ => false,
        }
    }
}

coded_enum! {
    pub enum RequestType {
        Standard = 1 => "STANDARD",
        /// Insurance auto auction payouts, settled as consolidated batches
        Iaa = 2 => "IAA",
    }
}

coded_enum! {
    pub enum PaymentMethodType {
        Ach = 1 => "ACH",
        Card = 2 => "CARD",
        Check = 3 => "CHECK",
    }
}

coded_enum! {
    pub enum Frequency {
        OneTime = 1 => "ONE_TIME",
        Daily = 2 => "DAILY",
        Weekly = 3 => "WEEKLY",
        Monthly = 4 => "MONTHLY",
    }
}

coded_enum! {
    pub enum TransactionType {
        Credit = 1 => "CREDIT",
        Debit = 2 => "DEBIT",
    }
}

/// Receiving account kind, drives the entry-detail transaction code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Checking,
    Savings,
}

/// Extended payee metadata stored as JSONB next to each request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PayeeDetails {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PayeeDetails {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// One resolved, payable instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub id: i64,
    pub tenant_id: i64,
    /// External correlation id, unique across the table
    pub payment_id: String,
    pub consolidated_request_id: Option<i64>,
    /// Encrypted at rest
    pub account_identifier: String,
    pub routing_number: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub frequency: Frequency,
    pub transaction_type: TransactionType,
    pub request_type: RequestType,
    pub method_type: PaymentMethodType,
    pub extended_data: PayeeDetails,
    pub status: PaymentStatus,
    pub settlement_identifier: Option<String>,
}

/// Bank-batch-bound aggregate of execution requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedRequest {
    pub id: i64,
    pub account_identifier: String,
    pub routing_number: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub request_type: RequestType,
    pub extended_data: PayeeDetails,
    pub retry_count: i32,
    pub status: PaymentStatus,
    pub settlement_identifier: Option<String>,
    pub last4_account_identifier: String,
}

/// In-memory grouping key for one consolidation run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsolidationKey {
    pub request_type: RequestType,
    pub account_identifier: String,
    pub routing_number: String,
}

impl ConsolidationKey {
    pub fn of(request: &ExecutionRequest) -> Self {
        Self {
            request_type: request.request_type,
            account_identifier: request.account_identifier.clone(),
            routing_number: request.routing_number.clone(),
        }
    }
}

/// Everything needed to fold one group into its batch row.
#[derive(Debug, Clone)]
pub struct ConsolidationGroup {
    pub key: ConsolidationKey,
    pub payment_date: NaiveDate,
    pub amount: Decimal,
    pub member_ids: Vec<i64>,
    pub extended_data: PayeeDetails,
    pub last4_account_identifier: String,
}

/// Last four characters of a plaintext account identifier.
pub fn last4(plaintext: &str) -> String {
    let chars: Vec<char> = plaintext.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}

/// Inbound file dedup status, persisted as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    InProgress,
    Incomplete,
    Retry,
    Complete,
    Errored,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::InProgress => "inprogress",
            FileStatus::Incomplete => "incomplete",
            FileStatus::Retry => "retry",
            FileStatus::Complete => "complete",
            FileStatus::Errored => "errored",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inprogress" => Some(FileStatus::InProgress),
            "incomplete" => Some(FileStatus::Incomplete),
            "retry" => Some(FileStatus::Retry),
            "complete" => Some(FileStatus::Complete),
            "errored" => Some(FileStatus::Errored),
            _ => None,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    InProgress,
    Errored,
    Complete,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::InProgress => "inprogress",
            RecordStatus::Errored => "errored",
            RecordStatus::Complete => "complete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inprogress" => Some(RecordStatus::InProgress),
            "errored" => Some(RecordStatus::Errored),
            "complete" => Some(RecordStatus::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDeduplication {
    pub file_id: Uuid,
    pub file_hash: String,
    pub file_path: String,
    pub business_file_type: String,
    pub status: FileStatus,
    pub total_record_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDeduplication {
    pub file_id: Uuid,
    pub record_id: Uuid,
    pub record_hash: String,
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
}

/// Hex md5 digest used for both file and record content hashes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}
