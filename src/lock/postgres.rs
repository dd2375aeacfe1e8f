//! PostgreSQL advisory-lock backend
//!
//! Session-level `pg_try_advisory_lock` on a connection held for the lease lifetime.
//! If the unlock call fails the connection is detached from the pool and dropped, which
//! ends the session and with it every advisory lock it held.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::warn;

use super::{LockBackend, LockLease, LockResource};
use crate::error::{SettlementError, SettlementResult};

pub struct PgAdvisoryLock {
    pool: PgPool,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockBackend for PgAdvisoryLock {
    async fn try_acquire(
        &self,
        resource: LockResource,
    ) -> SettlementResult<Option<Box<dyn LockLease>>> {
        let mut conn = self.pool.acquire().await?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(resource.id())
            .fetch_one(&mut *conn)
            .await?;

        if !locked {
            return Ok(None);
        }
        Ok(Some(Box::new(PgLease {
            conn: Some(conn),
            resource,
        })))
    }
}

struct PgLease {
    conn: Option<PoolConnection<Postgres>>,
    resource: LockResource,
}

#[async_trait]
impl LockLease for PgLease {
    async fn release(mut self: Box<Self>) -> SettlementResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.resource.id())
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(
                    resource = self.resource.as_str(),
                    "Advisory lock was not held at release, closing session"
                );
                drop(conn.detach());
                Ok(())
            }
            Err(e) => {
                drop(conn.detach());
                Err(SettlementError::Database(e.to_string()))
            }
        }
    }
}

impl Drop for PgLease {
    fn drop(&mut self) {
        // Lease dropped without release (caller future cancelled): end the session.
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}
