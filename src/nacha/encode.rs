use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use super::SettlementPayment;
use super::error::CodecError;
use super::field::routing_number;
use super::record::{
    BLOCKING_FACTOR, BatchControl, BatchHeader, EntryDetail, FileControl, FileHeader, Record,
    SERVICE_CLASS_CREDITS, TransactionCode,
};
use crate::config::NachaConfig;
use crate::money;

/// Everything outside the payments that goes into one file.
#[derive(Debug, Clone)]
pub struct FileContext<'a> {
    pub settings: &'a NachaConfig,
    pub created_at: NaiveDateTime,
    pub effective_date: NaiveDate,
    pub batch_number: u32,
}

/// Sum of the first 8 digits of each routing number, low-order 10 digits kept.
pub fn entry_hash<'a>(routing_numbers: impl IntoIterator<Item = &'a str>) -> Result<u64, CodecError> {
    let mut sum: u64 = 0;
    for routing in routing_numbers {
        let routing = routing_number(routing)?;
        let value = routing[..8].parse::<u64>().map_err(|_| CodecError::NotNumeric {
            field: "routing_number",
            value: routing.to_string(),
        })?;
        sum = (sum + value) % 10_000_000_000;
    }
    Ok(sum)
}

fn block_count(line_count: usize) -> u64 {
    line_count.div_ceil(BLOCKING_FACTOR) as u64
}

/// Encode one single-batch credit file. Lines are newline-terminated and the file is
/// padded with all-9 filler records to a whole number of 10-line blocks.
pub fn encode(ctx: &FileContext<'_>, payments: &[SettlementPayment]) -> Result<String, CodecError> {
    if payments.is_empty() {
        return Err(CodecError::EmptyBatch);
    }
    let settings = ctx.settings;

    let mut lines = Vec::with_capacity(payments.len() + 4);

    lines.push(
        FileHeader {
            priority_code: 1,
            immediate_destination: settings.immediate_destination.clone(),
            immediate_origin: settings.immediate_origin.clone(),
            creation_date: ctx.created_at.date(),
            creation_time: ctx.created_at.time(),
            file_id_modifier: 'A',
            destination_name: settings.destination_name.clone(),
            origin_name: settings.origin_name.clone(),
            reference_code: settings.reference_code.clone(),
        }
        .to_line()?,
    );

    lines.push(
        BatchHeader {
            service_class_code: SERVICE_CLASS_CREDITS,
            company_name: settings.company_name.clone(),
            company_discretionary_data: settings.company_discretionary_data.clone(),
            company_id: settings.company_id.clone(),
            sec_code: settings.sec_code.clone(),
            entry_description: settings.entry_description.clone(),
            descriptive_date: ctx.effective_date.format("%y%m%d").to_string(),
            effective_date: ctx.effective_date,
            originator_status_code: '1',
            originating_dfi: settings.originating_dfi.clone(),
            batch_number: ctx.batch_number,
        }
        .to_line()?,
    );

    let mut total_credit = Decimal::ZERO;
    for (index, payment) in payments.iter().enumerate() {
        let entry = EntryDetail {
            transaction_code: TransactionCode::credit_for(payment.account_type),
            routing_number: payment.routing_number.clone(),
            account_number: payment.account_number.clone(),
            amount: payment.amount,
            individual_id: payment.settlement_identifier.clone(),
            individual_name: payment.name.clone(),
            discretionary_data: String::new(),
            addenda_indicator: 0,
            trace_number: format!("{}{:07}", settings.originating_dfi, index + 1),
        };
        lines.push(entry.to_line()?);
        total_credit += money::round_to_cents(payment.amount);
    }

    let hash = entry_hash(payments.iter().map(|p| p.routing_number.as_str()))?;
    let entry_count = payments.len() as u64;

    lines.push(
        BatchControl {
            service_class_code: SERVICE_CLASS_CREDITS,
            entry_count,
            entry_hash: hash,
            total_debit: Decimal::ZERO,
            total_credit,
            company_id: settings.company_id.clone(),
            originating_dfi: settings.originating_dfi.clone(),
            batch_number: ctx.batch_number,
        }
        .to_line()?,
    );

    let blocks = block_count(lines.len() + 1);
    lines.push(
        FileControl {
            batch_count: 1,
            block_count: blocks,
            entry_count,
            entry_hash: hash,
            total_debit: Decimal::ZERO,
            total_credit,
        }
        .to_line()?,
    );
    lines.resize(blocks as usize * BLOCKING_FACTOR, Record::Filler.to_line()?);

    let mut text = lines.join("\n");
    text.push('\n');
    Ok(text)
}
