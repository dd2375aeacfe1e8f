//! Money Conversion Module
//!
//! Settlement amounts live as `rust_decimal::Decimal` (NUMERIC in PostgreSQL) so repeated
//! consolidation never accumulates binary rounding error. The bank file wants whole cents,
//! so every conversion to the wire goes through here.
//!
//! ## Cents rule
//! Format the amount with exactly two fraction digits, then drop the decimal point:
//!
//! ```text
//! 20.16  → "20.16"  → "2016"
//! 100    → "100.00" → "10000"
//! 0.005  → "0.01"   → "001"   (half away from zero)
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Amount must not be negative: {0}")]
    Negative(Decimal),
}

// ============================================================================
// Decimal → Cents
// ============================================================================

/// Round to the cent, half away from zero.
pub fn round_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Digits of the amount in cents, decimal point removed.
///
/// The leading zero of sub-dollar amounts is kept (`0.50` → `"050"`); field padding
/// makes that invisible on the wire.
pub fn cents_digits(amount: Decimal) -> Result<String, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative(amount));
    }
    let formatted = format!("{:.2}", round_to_cents(amount));
    Ok(formatted.replace('.', ""))
}
