//! Settlement File Codec
//!
//! Pure, stateless encoder/decoder for the fixed-width NACHA/ACH credit file:
//!
//! ```text
//! 1  File Header
//! 5  Batch Header
//! 6  Entry Detail   (one per payment)
//! 8  Batch Control  (entry count, entry hash, total credit)
//! 9  File Control
//! ```
//!
//! Nothing here touches storage or the clock; creation time and effective date are inputs.

pub mod decode;
pub mod encode;
pub mod error;
pub mod field;
pub mod identifier;
pub mod record;

pub use decode::{decode_file, decode_line, entries};
pub use encode::{FileContext, encode, entry_hash};
pub use error::CodecError;
pub use identifier::{SETTLEMENT_ID_WIDTH, SettlementKind, settlement_identifier};
pub use record::{Record, TransactionCode};

use rust_decimal::Decimal;

use crate::types::AccountType;

/// One entry-detail line worth of data, account number already decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPayment {
    pub routing_number: String,
    pub account_number: String,
    pub account_type: AccountType,
    pub amount: Decimal,
    pub name: String,
    pub settlement_identifier: String,
}
