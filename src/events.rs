//! Message bus payloads (JSON, camelCase)

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    ConsolidatedRequest, ExecutionRequest, PaymentMethodType, PaymentStatus, RequestType,
};

pub const EVENT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePaymentResponse {
    pub version: String,
    pub payment_id: String,
    pub status: PaymentStatus,
    pub settlement_identifier: Option<String>,
    pub payment_date: NaiveDate,
    pub amount: Decimal,
    pub last4_account_identifier: String,
}

impl ExecutePaymentResponse {
    pub fn for_request(request: &ExecutionRequest, last4_account_identifier: String) -> Self {
        Self {
            version: EVENT_VERSION.to_string(),
            payment_id: request.payment_id.clone(),
            status: request.status,
            settlement_identifier: request.settlement_identifier.clone(),
            payment_date: request.payment_date,
            amount: request.amount,
            last4_account_identifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedExecutePaymentResponse {
    pub version: String,
    pub consolidated_id: i64,
    pub status: PaymentStatus,
    pub settlement_identifier: Option<String>,
    pub payment_date: NaiveDate,
    pub amount: Decimal,
    pub last4_account_identifier: String,
    pub payment_request_type: RequestType,
}

impl From<&ConsolidatedRequest> for ConsolidatedExecutePaymentResponse {
    fn from(batch: &ConsolidatedRequest) -> Self {
        Self {
            version: EVENT_VERSION.to_string(),
            consolidated_id: batch.id,
            status: batch.status,
            settlement_identifier: batch.settlement_identifier.clone(),
            payment_date: batch.payment_date,
            amount: batch.amount,
            last4_account_identifier: batch.last4_account_identifier.clone(),
            payment_request_type: batch.request_type,
        }
    }
}

/// Timeline milestones of a single payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEventType {
    SavedInAdministrator,
    SentByAdministrator,
    ReceivedByExecutor,
    SentToBank,
    PaymentSettled,
    Cancelled,
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub version: String,
    pub payment_id: String,
    pub amount: Decimal,
    pub payment_date: NaiveDate,
    pub payment_request_type: RequestType,
    pub payment_method_type: PaymentMethodType,
    pub event_type: PaymentEventType,
    pub event_date_time: DateTime<Utc>,
    pub settlement_amount: Decimal,
}

impl PaymentEvent {
    pub fn new(
        request: &ExecutionRequest,
        event_type: PaymentEventType,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: EVENT_VERSION.to_string(),
            payment_id: request.payment_id.clone(),
            amount: request.amount,
            payment_date: request.payment_date,
            payment_request_type: request.request_type,
            payment_method_type: request.method_type,
            event_type,
            event_date_time: at,
            settlement_amount: request.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingCompleted {
    pub business_file_type: String,
}

/// One claimed line of an inbound file, fanned out for business processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordProcessing {
    pub file_id: Uuid,
    pub record_id: Uuid,
    pub business_file_type: String,
    pub total_record_count: i32,
    pub file_path: String,
    pub archive_folder_location: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFeedback {
    pub file_id: Uuid,
    pub record_id: Uuid,
    pub business_file_type: String,
    pub total_record_count: i32,
    pub is_error: bool,
    pub file_path: String,
    pub archive_folder_location: String,
}

impl RecordFeedback {
    pub fn for_record(record: &RecordProcessing, is_error: bool) -> Self {
        Self {
            file_id: record.file_id,
            record_id: record.record_id,
            business_file_type: record.business_file_type.clone(),
            total_record_count: record.total_record_count,
            is_error,
            file_path: record.file_path.clone(),
            archive_folder_location: record.archive_folder_location.clone(),
        }
    }
}
