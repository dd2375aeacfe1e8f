//! Shared test fixtures

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::task::TaskContext;
use crate::types::{
    ConsolidationGroup, ConsolidationKey, ExecutionRequest, Frequency, PayeeDetails,
    PaymentMethodType, PaymentStatus, RequestType, TransactionType, last4,
};

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A due IAA ACH credit for Ada Lovelace, ready to insert.
pub fn request(payment_id: &str, account_identifier: &str, amount: &str) -> ExecutionRequest {
    ExecutionRequest {
        id: 0,
        tenant_id: 1,
        payment_id: payment_id.to_string(),
        consolidated_request_id: None,
        account_identifier: account_identifier.to_string(),
        routing_number: "021000021".to_string(),
        amount: dec(amount),
        payment_date: date("2024-06-10"),
        frequency: Frequency::OneTime,
        transaction_type: TransactionType::Credit,
        request_type: RequestType::Iaa,
        method_type: PaymentMethodType::Ach,
        extended_data: PayeeDetails {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            ..PayeeDetails::default()
        },
        status: PaymentStatus::New,
        settlement_identifier: None,
    }
}

/// Single-member group for `member`, as the consolidation engine would build it.
pub fn group_of(member: &ExecutionRequest, amount: &str) -> ConsolidationGroup {
    let plaintext = member
        .account_identifier
        .strip_prefix("enc:")
        .unwrap_or(&member.account_identifier);
    ConsolidationGroup {
        key: ConsolidationKey::of(member),
        payment_date: member.payment_date,
        amount: dec(amount),
        member_ids: vec![member.id],
        extended_data: member.extended_data.clone(),
        last4_account_identifier: last4(plaintext),
    }
}

/// All request types, ACH, not cancelled.
pub fn task_context(task_date: &str) -> TaskContext {
    TaskContext {
        task_date: date(task_date),
        request_types: Vec::new(),
        method_type: PaymentMethodType::Ach,
        frequency: None,
        cancel: CancellationToken::new(),
    }
}
