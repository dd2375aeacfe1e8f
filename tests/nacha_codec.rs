use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use ach_settlement::config::NachaConfig;
use ach_settlement::nacha::{
    self, FileContext, Record, SETTLEMENT_ID_WIDTH, SettlementKind, SettlementPayment,
    settlement_identifier,
};
use ach_settlement::types::AccountType;

fn payment(routing: &str, amount: &str, id: &str) -> SettlementPayment {
    SettlementPayment {
        routing_number: routing.to_string(),
        account_number: "000123456789".to_string(),
        account_type: AccountType::Checking,
        amount: Decimal::from_str(amount).unwrap(),
        name: "Ada Lovelace".to_string(),
        settlement_identifier: id.to_string(),
    }
}

fn encode(payments: &[SettlementPayment]) -> String {
    let settings = NachaConfig::default();
    let ctx = FileContext {
        settings: &settings,
        created_at: NaiveDate::from_ymd_opt(2024, 6, 10)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap(),
        effective_date: NaiveDate::from_ymd_opt(2024, 6, 11).unwrap(),
        batch_number: 1,
    };
    nacha::encode(&ctx, payments).unwrap()
}

#[test]
fn settlement_identifier_for_consolidated_batch() {
    let june_10 = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
    let id = settlement_identifier(12345, SETTLEMENT_ID_WIDTH, SettlementKind::Consolidated, june_10);
    assert_eq!(id, "24061000012345C");
    // Same inputs, same day: same identifier
    assert_eq!(
        id,
        settlement_identifier(12345, SETTLEMENT_ID_WIDTH, SettlementKind::Consolidated, june_10)
    );
}

#[test]
fn entry_hash_of_two_routing_numbers() {
    let text = encode(&[
        payment("021000021", "1.00", "24061000000001P"),
        payment("011401533", "2.00", "24061000000002P"),
    ]);
    let batch_control = text.lines().find(|l| l.starts_with('8')).unwrap();
    assert_eq!(&batch_control[10..20], "0003240155");
    let file_control = text.lines().find(|l| l.starts_with('9')).unwrap();
    assert_eq!(&file_control[21..31], "0003240155");
}

#[test]
fn entry_hash_rejects_eight_digit_routing() {
    let err = nacha::entry_hash(["21000021"]).unwrap_err();
    assert_eq!(
        err,
        nacha::CodecError::InvalidField {
            field: "routing_number",
            value: "21000021".to_string()
        }
    );
}

#[test]
fn footer_counts_and_totals_match_entries() {
    let routing = ["021000021", "011401533", "091000019", "121000248", "026009593"];
    let amounts = ["20.16", "30.00", "49.84", "0.01", "1234.56"];
    let payments: Vec<_> = routing
        .iter()
        .zip(amounts)
        .enumerate()
        .map(|(i, (r, a))| payment(r, a, &format!("2406100000000{}P", i)))
        .collect();

    let text = encode(&payments);
    assert!(text.lines().all(|l| l.len() == 94));

    let records = nacha::decode_file(&text).unwrap();
    assert_eq!(nacha::entries(&records).count(), payments.len());

    let expected_hash: u64 = routing
        .iter()
        .map(|r| r[..8].parse::<u64>().unwrap())
        .sum::<u64>()
        % 10_000_000_000;
    let expected_total: Decimal = amounts.iter().map(|a| Decimal::from_str(a).unwrap()).sum();

    let Some(Record::BatchControl(control)) = records.iter().find(|r| r.type_code() == '8') else {
        panic!("missing batch control");
    };
    assert_eq!(control.entry_count, 5);
    assert_eq!(control.entry_hash, expected_hash);
    assert_eq!(control.total_credit, expected_total);

    let batch_control = text.lines().find(|l| l.starts_with('8')).unwrap();
    assert_eq!(&batch_control[32..44], "000000133457");

    let Some(Record::FileControl(file)) = records
        .iter()
        .find(|r| matches!(r, Record::FileControl(_)))
    else {
        panic!("missing file control");
    };
    assert_eq!(file.entry_count, 5);
    assert_eq!(file.batch_count, 1);
    // 9 lines plus one filler → one block
    assert_eq!(file.block_count, 1);
    assert_eq!(file.total_credit, expected_total);
    assert_eq!(records.len(), 10);
    assert_eq!(records.last(), Some(&Record::Filler));
    let file_control = text.lines().find(|l| l.starts_with("9000001")).unwrap();
    assert_eq!(&file_control[1..13], "000001000001");
}

#[test]
fn entry_fields_are_fixed_width() {
    let mut long_name = payment("021000021", "7.5", "24061000000007C");
    long_name.name = "Bartholomew Montgomery-Featherstonehaugh".to_string();
    long_name.account_type = AccountType::Savings;
    let text = encode(&[long_name]);

    let entry = text.lines().find(|l| l.starts_with('6')).unwrap();
    assert_eq!(&entry[1..3], "32");
    assert_eq!(&entry[3..12], "021000021");
    assert_eq!(&entry[12..29], "000123456789     ");
    assert_eq!(&entry[29..39], "0000000750");
    assert_eq!(&entry[39..54], "24061000000007C");
    assert_eq!(&entry[54..76], "Bartholomew Montgomery");
}
