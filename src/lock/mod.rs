//! Lock Coordinator
//!
//! Cluster-wide named mutual exclusion. Every critical section that mutates shared
//! aggregate state runs inside [`LockCoordinator::run_with_lock`].
//!
//! # Guarantees
//!
//! 1. Same [`LockResource`] serializes all callers across every process sharing the store
//! 2. The lease is released before `run_with_lock` returns, on success, error and panic
//! 3. A failed acquisition returns the error without running the critical section
//! 4. Cancellation while waiting returns promptly without holding the lock

pub mod postgres;

pub use postgres::PgAdvisoryLock;

use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{SettlementError, SettlementResult};

/// One id per logical critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum LockResource {
    ConsolidatePayments = 7_001,
    CreateSettlementFile = 7_002,
    InboundFileProcessing = 7_003,
}

impl LockResource {
    #[inline]
    pub fn id(&self) -> i64 {
        *self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockResource::ConsolidatePayments => "consolidate_payments",
            LockResource::CreateSettlementFile => "create_settlement_file",
            LockResource::InboundFileProcessing => "inbound_file_processing",
        }
    }
}

/// A held lock. Must be released exactly once.
#[async_trait]
pub trait LockLease: Send {
    async fn release(self: Box<Self>) -> SettlementResult<()>;
}

/// Lock substrate. `try_acquire` never blocks; `Ok(None)` means someone else holds it.
#[async_trait]
pub trait LockBackend: Send + Sync {
    async fn try_acquire(&self, resource: LockResource)
    -> SettlementResult<Option<Box<dyn LockLease>>>;
}

pub struct LockCoordinator {
    backend: Arc<dyn LockBackend>,
    retry_interval: Duration,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>, retry_interval: Duration) -> Self {
        Self {
            backend,
            retry_interval,
        }
    }

    /// Run `critical` while holding `resource`.
    pub async fn run_with_lock<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        resource: LockResource,
        critical: F,
    ) -> SettlementResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = SettlementResult<T>> + Send,
        T: Send,
    {
        let lease = self.acquire(cancel, resource).await?;
        debug!(resource = resource.as_str(), "Lock acquired");

        let outcome = AssertUnwindSafe(critical()).catch_unwind().await;

        if let Err(e) = lease.release().await {
            warn!(resource = resource.as_str(), error = %e, "Lock release failed");
        } else {
            debug!(resource = resource.as_str(), "Lock released");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn acquire(
        &self,
        cancel: &CancellationToken,
        resource: LockResource,
    ) -> SettlementResult<Box<dyn LockLease>> {
        loop {
            if cancel.is_cancelled() {
                return Err(SettlementError::Cancelled);
            }

            if let Some(lease) = self.backend.try_acquire(resource).await? {
                return Ok(lease);
            }

            debug!(resource = resource.as_str(), "Lock busy, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(SettlementError::Cancelled),
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }
}
