//! Account identifier cipher
//!
//! Key management lives outside this service. `PlaintextCipher` is the identity
//! transform used by dev and test deployments whose stores hold clear account numbers.

use super::AccountCipher;
use crate::error::{SettlementError, SettlementResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl AccountCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &str) -> SettlementResult<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> SettlementResult<String> {
        if ciphertext.is_empty() {
            return Err(SettlementError::Cipher(
                "empty account identifier".to_string(),
            ));
        }
        Ok(ciphertext.to_string())
    }
}
