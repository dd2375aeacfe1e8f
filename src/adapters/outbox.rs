//! PostgreSQL outbox bus
//!
//! Publish appends to `outbox_events_tb`. Consumers lock the oldest undelivered row of a topic
//! with `FOR UPDATE SKIP LOCKED`, run the handler, and mark it delivered in the same
//! transaction. A failed handler bumps `attempts` and leaves the row for redelivery.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use super::{MessageBus, MessageConsumer, MessageHandler};
use crate::error::{SettlementError, SettlementResult};

pub struct OutboxBus {
    pool: PgPool,
}

impl OutboxBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Undelivered messages on `topic`.
    pub async fn pending(&self, topic: &str) -> SettlementResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_events_tb WHERE topic = $1 AND delivered_at IS NULL",
        )
        .bind(topic)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageBus for OutboxBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> SettlementResult<()> {
        sqlx::query("INSERT INTO outbox_events_tb (topic, payload) VALUES ($1, $2)")
            .bind(topic)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| SettlementError::Bus(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for OutboxBus {
    async fn poll(&self, topic: &str, handler: &dyn MessageHandler) -> SettlementResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, payload FROM outbox_events_tb
            WHERE topic = $1 AND delivered_at IS NULL
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(topic)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let id: i64 = row.get("id");
        let payload: Vec<u8> = row.get("payload");

        match handler.handle(&payload).await {
            Ok(()) => {
                sqlx::query("UPDATE outbox_events_tb SET delivered_at = NOW() WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                debug!(topic, id, "Outbox message delivered");
                Ok(true)
            }
            Err(e) => {
                sqlx::query(
                    "UPDATE outbox_events_tb SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
                )
                .bind(id)
                .bind(e.to_string())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                warn!(topic, id, error = %e, "Outbox handler failed, message kept for redelivery");
                Err(e)
            }
        }
    }
}
