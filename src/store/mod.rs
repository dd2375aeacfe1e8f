//! Settlement Store
//!
//! Relational state behind two traits:
//! - [`PaymentStore`]: execution requests and consolidated batches
//! - [`DedupStore`]: inbound file and record deduplication
//!
//! Methods ending in `_then` take a deferred [`Publish`] action. The status change and the
//! publish form one unit: the store applies its writes inside a transaction, awaits the
//! action, and commits only if it succeeded. On failure nothing is persisted.

pub mod dedup;
pub mod payments;

#[cfg(test)]
pub mod mock;

pub use dedup::PgDedupStore;
pub use payments::PgPaymentStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{SettlementError, SettlementResult};
use crate::types::{
    ConsolidatedRequest, ConsolidationGroup, ExecutionRequest, FileDeduplication, Frequency,
    PaymentMethodType, PaymentStatus, RecordDeduplication, RequestType,
};

/// Side effect gated into a store transaction
pub type Publish<'a> = BoxFuture<'a, SettlementResult<()>>;

/// Reject a status change outside the payment lifecycle.
pub(crate) fn ensure_transition(from: PaymentStatus, to: PaymentStatus) -> SettlementResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(SettlementError::InvalidState(format!(
            "status {} cannot move to {}",
            from, to
        )))
    }
}

/// Outcome of folding one consolidation group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldOutcome {
    pub batch_id: i64,
    pub created: bool,
}

/// A batch closed to further folds, with its amount as of the close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchClaim {
    pub settlement_identifier: String,
    pub amount: Decimal,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new execution request. A known `payment_id` is rejected with `Duplicate`.
    async fn insert_execution_request(&self, request: &ExecutionRequest) -> SettlementResult<i64>;

    async fn get_execution_request(&self, id: i64) -> SettlementResult<Option<ExecutionRequest>>;

    async fn get_batch(&self, id: i64) -> SettlementResult<Option<ConsolidatedRequest>>;

    // === Consolidation ===

    /// Up to `limit` claimable rows of `request_type` due by `up_to`, id ascending.
    /// `frequency` narrows the rows when given.
    ///
    /// Claimable means `New`, or `Consolidated` without a batch id (claimed by a run that
    /// failed before folding them).
    async fn fetch_consolidation_candidates(
        &self,
        request_type: RequestType,
        frequency: Option<Frequency>,
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>>;

    /// Claim step: set status `Consolidated` on `ids`.
    async fn mark_consolidated(&self, ids: &[i64]) -> SettlementResult<u64>;

    /// In one transaction: find the open, unclaimed batch for the group's key and date
    /// (row-locked), insert it or add the group sum to its amount, then back-fill member
    /// batch ids. A batch holding a settlement id is closed and never receives a fold.
    async fn fold_into_batch(&self, group: &ConsolidationGroup) -> SettlementResult<FoldOutcome>;

    // === Outbound ===

    async fn fetch_open_batches(
        &self,
        request_types: &[RequestType],
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ConsolidatedRequest>>;

    /// `New`/`Accepted` requests of `method` and one of `request_types`, due by `up_to`.
    async fn fetch_individual_requests(
        &self,
        request_types: &[RequestType],
        method: PaymentMethodType,
        frequency: Option<Frequency>,
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>>;

    /// Close the batch to folds by persisting a settlement id unless one already exists.
    /// Returns the effective id and the amount read under the same row lock.
    async fn assign_batch_settlement_id(
        &self,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<BatchClaim>;

    /// Persist a settlement id unless one already exists. Returns the effective id.

    async fn assign_request_settlement_id(
        &self,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<String>;

    async fn increment_batch_retry(&self, ids: &[i64]) -> SettlementResult<u64>;

    /// Open batches only.
    async fn mark_batch_errored(&self, id: i64) -> SettlementResult<bool>;

    /// Open batches in `ids` move to `InProgress`.
    async fn mark_batches_in_progress(&self, ids: &[i64]) -> SettlementResult<u64>;

    /// Members of `batch_ids` with id greater than `after_id`, id ascending.
    async fn fetch_batch_members(
        &self,
        batch_ids: &[i64],
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>>;

    // === Completion ===

    /// Requests in `status` with payment date on or before `due_by`, keyset-paginated.
    async fn fetch_requests_by_status(
        &self,
        status: PaymentStatus,
        due_by: NaiveDate,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>>;

    async fn fetch_batches_by_status(
        &self,
        status: PaymentStatus,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ConsolidatedRequest>>;

    /// `Consolidated` requests whose batch is `Completed`.
    async fn fetch_settled_members(
        &self,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>>;

    /// Compare-and-set a request's status, gated on `publish`. `Ok(false)` if the row
    /// was not in `from`; the action is not run in that case. A `from → to` pair outside
    /// the status lifecycle is rejected with `InvalidState` before anything is written.
    async fn transition_request_then(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool>;

    async fn transition_batch_then(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool>;

    // === Acknowledgment lookup ===

    async fn find_batch_by_settlement_id(
        &self,
        settlement_id: &str,
    ) -> SettlementResult<Option<ConsolidatedRequest>>;

    async fn find_request_by_settlement_id(
        &self,
        settlement_id: &str,
    ) -> SettlementResult<Option<ExecutionRequest>>;
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Most recent row for `file_hash` created at or after `since`.
    async fn find_file(
        &self,
        file_hash: &str,
        since: DateTime<Utc>,
    ) -> SettlementResult<Option<FileDeduplication>>;

    async fn get_file(&self, file_id: Uuid) -> SettlementResult<Option<FileDeduplication>>;

    /// Insert a new `inprogress` file row.
    async fn claim_file(&self, file: &FileDeduplication) -> SettlementResult<()>;

    /// `retry` → `inprogress` with a refreshed record total. `Ok(false)` if not in `retry`.
    async fn reclaim_file(&self, file_id: Uuid, total_record_count: i32) -> SettlementResult<bool>;

    /// Operator escalation: any non-complete file → `retry`.
    async fn mark_file_retry(&self, file_id: Uuid) -> SettlementResult<bool>;

    async fn find_record(
        &self,
        file_id: Uuid,
        record_hash: &str,
    ) -> SettlementResult<Option<RecordDeduplication>>;

    /// Insert an `inprogress` record row gated on `publish`. `Ok(false)` when
    /// `(file_id, record_hash)` already exists; the action is not run in that case.
    async fn claim_record_then(
        &self,
        record: &RecordDeduplication,
        publish: Publish<'_>,
    ) -> SettlementResult<bool>;

    /// `errored`, or `inprogress` last touched before `stale_before`, back to a fresh
    /// `inprogress`, gated on `publish`.
    async fn reclaim_record_then(
        &self,
        file_id: Uuid,
        record_id: Uuid,
        stale_before: DateTime<Utc>,
        publish: Publish<'_>,
    ) -> SettlementResult<bool>;

    /// Record `errored` and file `incomplete`, in one transaction.
    async fn record_failed(&self, file_id: Uuid, record_id: Uuid) -> SettlementResult<bool>;

    /// Record → `complete`. `Ok(false)` if it already was.
    async fn record_completed(&self, file_id: Uuid, record_id: Uuid) -> SettlementResult<bool>;

    async fn count_completed_records(&self, file_id: Uuid) -> SettlementResult<i64>;

    /// File → `complete` gated on `publish`. `Ok(false)` if it already was.
    async fn complete_file_then(&self, file_id: Uuid, publish: Publish<'_>)
    -> SettlementResult<bool>;
}
