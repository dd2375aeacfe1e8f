//! Collaborator Adapters
//!
//! Boundaries to the message bus, blob storage, account cipher and wall clock.
//! Components take these as `Arc<dyn ...>` constructor parameters.
//!
//! Bus contract: `publish` is at-least-once with no cross-topic ordering;
//! `poll` hands at most one message to the handler and redelivers it later if the
//! handler fails.

pub mod blob;
pub mod cipher;
pub mod clock;
pub mod outbox;

#[cfg(test)]
pub mod mock;

pub use blob::LocalBlobStore;
pub use cipher::PlaintextCipher;
pub use clock::SystemClock;
pub use outbox::OutboxBus;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::SettlementResult;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SettlementResult<()>;
}

/// Serialize `message` as JSON and publish it.
pub async fn publish_json<T>(bus: &dyn MessageBus, topic: &str, message: &T) -> SettlementResult<()>
where
    T: Serialize + Sync,
{
    let payload = serde_json::to_vec(message)?;
    bus.publish(topic, payload).await
}

/// Receives one message at a time. Returning an error leaves the message for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> SettlementResult<()>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Deliver the next pending message on `topic`, if any.
    ///
    /// Returns `Ok(true)` when a message was handled successfully, `Ok(false)` when the
    /// topic was empty. A handler error is returned after the message is put back.
    async fn poll(&self, topic: &str, handler: &dyn MessageHandler) -> SettlementResult<bool>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, path: &str, content: &[u8]) -> SettlementResult<()>;

    /// Files directly inside `folder`, sorted by path.
    async fn list(&self, folder: &str) -> SettlementResult<Vec<String>>;

    async fn read(&self, path: &str) -> SettlementResult<Vec<u8>>;

    async fn read_lines(&self, path: &str) -> SettlementResult<Vec<String>> {
        let bytes = self.read(path).await?;
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| line.to_string())
            .collect())
    }

    /// Move `src` to `dst`, creating parent folders as needed.
    async fn move_file(&self, src: &str, dst: &str) -> SettlementResult<()>;
}

/// Encrypts account identifiers at rest.
pub trait AccountCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> SettlementResult<String>;
    fn decrypt(&self, ciphertext: &str) -> SettlementResult<String>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}
