//! Record layouts
//!
//! Every record is exactly 94 characters. Positions below are 1-based, inclusive.
//!
//! ```text
//! 1 File Header    1 type | 2-3 priority | 4-13 dest | 14-23 origin | 24-29 YYMMDD | 30-33 HHMM
//!                  34 modifier | 35-37 "094" | 38-39 "10" | 40 "1" | 41-63 dest name
//!                  64-86 origin name | 87-94 reference
//! 5 Batch Header   1 | 2-4 service class | 5-20 company name | 21-40 discretionary | 41-50 company id
//!                  51-53 SEC | 54-63 entry desc | 64-69 desc date | 70-75 effective | 76-78 settle
//!                  79 originator status | 80-87 ODFI | 88-94 batch number
//! 6 Entry Detail   1 | 2-3 txn code | 4-12 routing | 13-29 account | 30-39 amount | 40-54 individual id
//!                  55-76 name | 77-78 discretionary | 79 addenda | 80-94 trace
//! 8 Batch Control  1 | 2-4 service class | 5-10 entries | 11-20 hash | 21-32 debit | 33-44 credit
//!                  45-54 company id | 55-73 MAC | 74-79 reserved | 80-87 ODFI | 88-94 batch number
//! 9 File Control   1 | 2-7 batches | 8-13 blocks | 14-21 entries | 22-31 hash | 32-43 debit
//!                  44-55 credit | 56-94 reserved
//! ```

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;

use super::error::CodecError;
use super::field::{
    alpha, amount, numeric, numeric_low_order, numeric_u64, parse_cents, parse_u64,
    right_justified, routing_number, slice,
};
use crate::types::AccountType;

pub const RECORD_LENGTH: usize = 94;
pub const BLOCKING_FACTOR: usize = 10;
/// Credits only
pub const SERVICE_CLASS_CREDITS: u16 = 220;

/// Entry-detail transaction codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransactionCode {
    CheckingCredit = 22,
    CheckingDebit = 27,
    SavingsCredit = 32,
    SavingsDebit = 37,
}

impl TransactionCode {
    pub fn credit_for(account_type: AccountType) -> Self {
        match account_type {
            AccountType::Checking => TransactionCode::CheckingCredit,
            AccountType::Savings => TransactionCode::SavingsCredit,
        }
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            22 => Some(TransactionCode::CheckingCredit),
            27 => Some(TransactionCode::CheckingDebit),
            32 => Some(TransactionCode::SavingsCredit),
            37 => Some(TransactionCode::SavingsDebit),
            _ => None,
        }
    }

    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionCode::CheckingCredit | TransactionCode::SavingsCredit
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub priority_code: u8,
    pub immediate_destination: String,
    pub immediate_origin: String,
    pub creation_date: NaiveDate,
    pub creation_time: NaiveTime,
    pub file_id_modifier: char,
    pub destination_name: String,
    pub origin_name: String,
    pub reference_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
    pub service_class_code: u16,
    pub company_name: String,
    pub company_discretionary_data: String,
    pub company_id: String,
    pub sec_code: String,
    pub entry_description: String,
    pub descriptive_date: String,
    pub effective_date: NaiveDate,
    pub originator_status_code: char,
    pub originating_dfi: String,
    pub batch_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDetail {
    pub transaction_code: TransactionCode,
    pub routing_number: String,
    pub account_number: String,
    pub amount: Decimal,
    /// Settlement identifier; its last character tells consolidated from individual
    pub individual_id: String,
    pub individual_name: String,
    pub discretionary_data: String,
    pub addenda_indicator: u8,
    pub trace_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchControl {
    pub service_class_code: u16,
    pub entry_count: u64,
    pub entry_hash: u64,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub company_id: String,
    pub originating_dfi: String,
    pub batch_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileControl {
    pub batch_count: u64,
    pub block_count: u64,
    pub entry_count: u64,
    pub entry_hash: u64,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    FileHeader(FileHeader),
    BatchHeader(BatchHeader),
    Entry(EntryDetail),
    BatchControl(BatchControl),
    FileControl(FileControl),
    /// All-nines block filler
    Filler,
}

fn yymmdd(date: NaiveDate) -> String {
    date.format("%y%m%d").to_string()
}

fn parse_yymmdd(field: &'static str, raw: &str) -> Result<NaiveDate, CodecError> {
    NaiveDate::parse_from_str(raw, "%y%m%d").map_err(|_| CodecError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn check_length(line: &str) -> Result<(), CodecError> {
    if line.len() != RECORD_LENGTH || !line.is_ascii() {
        return Err(CodecError::LineLength {
            expected: RECORD_LENGTH,
            actual: line.chars().count(),
        });
    }
    Ok(())
}

fn first_char(raw: &str) -> char {
    raw.chars().next().unwrap_or(' ')
}

impl FileHeader {
    pub fn to_line(&self) -> Result<String, CodecError> {
        Ok([
            "1".to_string(),
            numeric_u64("priority_code", self.priority_code as u64, 2)?,
            right_justified("immediate_destination", &self.immediate_destination, 10)?,
            right_justified("immediate_origin", &self.immediate_origin, 10)?,
            yymmdd(self.creation_date),
            self.creation_time.format("%H%M").to_string(),
            self.file_id_modifier.to_string(),
            "094".to_string(),
            "10".to_string(),
            "1".to_string(),
            alpha(&self.destination_name, 23),
            alpha(&self.origin_name, 23),
            alpha(&self.reference_code, 8),
        ]
        .concat())
    }

    pub fn parse(line: &str) -> Result<Self, CodecError> {
        check_length(line)?;
        let time_raw = slice(line, 29, 33);
        let creation_time = NaiveTime::parse_from_str(time_raw, "%H%M").map_err(|_| {
            CodecError::InvalidField {
                field: "creation_time",
                value: time_raw.to_string(),
            }
        })?;
        Ok(Self {
            priority_code: parse_u64("priority_code", slice(line, 1, 3))? as u8,
            immediate_destination: slice(line, 3, 13).trim().to_string(),
            immediate_origin: slice(line, 13, 23).trim().to_string(),
            creation_date: parse_yymmdd("creation_date", slice(line, 23, 29))?,
            creation_time,
            file_id_modifier: first_char(slice(line, 33, 34)),
            destination_name: slice(line, 40, 63).trim_end().to_string(),
            origin_name: slice(line, 63, 86).trim_end().to_string(),
            reference_code: slice(line, 86, 94).trim_end().to_string(),
        })
    }
}

impl BatchHeader {
    pub fn to_line(&self) -> Result<String, CodecError> {
        Ok([
            "5".to_string(),
            numeric_u64("service_class_code", self.service_class_code as u64, 3)?,
            alpha(&self.company_name, 16),
            alpha(&self.company_discretionary_data, 20),
            alpha(&self.company_id, 10),
            alpha(&self.sec_code, 3),
            alpha(&self.entry_description, 10),
            alpha(&self.descriptive_date, 6),
            yymmdd(self.effective_date),
            // Settlement date is filled in by the receiving operator
            "   ".to_string(),
            self.originator_status_code.to_string(),
            numeric("originating_dfi", &self.originating_dfi, 8)?,
            numeric_u64("batch_number", self.batch_number as u64, 7)?,
        ]
        .concat())
    }

    pub fn parse(line: &str) -> Result<Self, CodecError> {
        check_length(line)?;
        Ok(Self {
            service_class_code: parse_u64("service_class_code", slice(line, 1, 4))? as u16,
            company_name: slice(line, 4, 20).trim_end().to_string(),
            company_discretionary_data: slice(line, 20, 40).trim_end().to_string(),
            company_id: slice(line, 40, 50).trim_end().to_string(),
            sec_code: slice(line, 50, 53).trim_end().to_string(),
            entry_description: slice(line, 53, 63).trim_end().to_string(),
            descriptive_date: slice(line, 63, 69).trim_end().to_string(),
            effective_date: parse_yymmdd("effective_date", slice(line, 69, 75))?,
            originator_status_code: first_char(slice(line, 78, 79)),
            originating_dfi: slice(line, 79, 87).to_string(),
            batch_number: parse_u64("batch_number", slice(line, 87, 94))? as u32,
        })
    }
}

impl EntryDetail {
    pub fn to_line(&self) -> Result<String, CodecError> {
        Ok([
            "6".to_string(),
            numeric_u64("transaction_code", self.transaction_code.code() as u64, 2)?,
            routing_number(&self.routing_number)?.to_string(),
            alpha(&self.account_number, 17),
            amount("amount", self.amount, 10)?,
            right_justified("individual_id", &self.individual_id, 15)?,
            alpha(&self.individual_name, 22),
            alpha(&self.discretionary_data, 2),
            numeric_u64("addenda_indicator", self.addenda_indicator as u64, 1)?,
            numeric("trace_number", &self.trace_number, 15)?,
        ]
        .concat())
    }

    pub fn parse(line: &str) -> Result<Self, CodecError> {
        check_length(line)?;
        let code_raw = slice(line, 1, 3);
        let transaction_code = parse_u64("transaction_code", code_raw)
            .ok()
            .and_then(|code| u8::try_from(code).ok())
            .and_then(TransactionCode::from_code)
            .ok_or_else(|| CodecError::InvalidField {
                field: "transaction_code",
                value: code_raw.to_string(),
            })?;
        Ok(Self {
            transaction_code,
            routing_number: slice(line, 3, 12).to_string(),
            account_number: slice(line, 12, 29).trim_end().to_string(),
            amount: parse_cents("amount", slice(line, 29, 39))?,
            individual_id: slice(line, 39, 54).trim().to_string(),
            individual_name: slice(line, 54, 76).trim_end().to_string(),
            discretionary_data: slice(line, 76, 78).trim_end().to_string(),
            addenda_indicator: parse_u64("addenda_indicator", slice(line, 78, 79))? as u8,
            trace_number: slice(line, 79, 94).to_string(),
        })
    }
}

impl BatchControl {
    pub fn to_line(&self) -> Result<String, CodecError> {
        Ok([
            "8".to_string(),
            numeric_u64("service_class_code", self.service_class_code as u64, 3)?,
            numeric_u64("entry_count", self.entry_count, 6)?,
            numeric_low_order(self.entry_hash, 10),
            amount("total_debit", self.total_debit, 12)?,
            amount("total_credit", self.total_credit, 12)?,
            alpha(&self.company_id, 10),
            alpha("", 19),
            alpha("", 6),
            numeric("originating_dfi", &self.originating_dfi, 8)?,
            numeric_u64("batch_number", self.batch_number as u64, 7)?,
        ]
        .concat())
    }

    pub fn parse(line: &str) -> Result<Self, CodecError> {
        check_length(line)?;
        Ok(Self {
            service_class_code: parse_u64("service_class_code", slice(line, 1, 4))? as u16,
            entry_count: parse_u64("entry_count", slice(line, 4, 10))?,
            entry_hash: parse_u64("entry_hash", slice(line, 10, 20))?,
            total_debit: parse_cents("total_debit", slice(line, 20, 32))?,
            total_credit: parse_cents("total_credit", slice(line, 32, 44))?,
            company_id: slice(line, 44, 54).trim_end().to_string(),
            originating_dfi: slice(line, 79, 87).to_string(),
            batch_number: parse_u64("batch_number", slice(line, 87, 94))? as u32,
        })
    }
}

impl FileControl {
    pub fn to_line(&self) -> Result<String, CodecError> {
        Ok([
            "9".to_string(),
            numeric_u64("batch_count", self.batch_count, 6)?,
            numeric_u64("block_count", self.block_count, 6)?,
            numeric_u64("entry_count", self.entry_count, 8)?,
            numeric_low_order(self.entry_hash, 10),
            amount("total_debit", self.total_debit, 12)?,
            amount("total_credit", self.total_credit, 12)?,
            alpha("", 39),
        ]
        .concat())
    }

    pub fn parse(line: &str) -> Result<Self, CodecError> {
        check_length(line)?;
        Ok(Self {
            batch_count: parse_u64("batch_count", slice(line, 1, 7))?,
            block_count: parse_u64("block_count", slice(line, 7, 13))?,
            entry_count: parse_u64("entry_count", slice(line, 13, 21))?,
            entry_hash: parse_u64("entry_hash", slice(line, 21, 31))?,
            total_debit: parse_cents("total_debit", slice(line, 31, 43))?,
            total_credit: parse_cents("total_credit", slice(line, 43, 55))?,
        })
    }
}

impl Record {
    pub fn to_line(&self) -> Result<String, CodecError> {
        match self {
            Record::FileHeader(r) => r.to_line(),
            Record::BatchHeader(r) => r.to_line(),
            Record::Entry(r) => r.to_line(),
            Record::BatchControl(r) => r.to_line(),
            Record::FileControl(r) => r.to_line(),
            Record::Filler => Ok("9".repeat(RECORD_LENGTH)),
        }
    }

    pub fn type_code(&self) -> char {
        match self {
            Record::FileHeader(_) => '1',
            Record::BatchHeader(_) => '5',
            Record::Entry(_) => '6',
            Record::BatchControl(_) => '8',
            Record::FileControl(_) | Record::Filler => '9',
        }
    }
}
