//! In-memory store for tests
//!
//! `_then` methods apply their writes, await the action outside the lock, and restore the
//! previous rows if it fails, which matches what a rolled-back transaction leaves behind.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

use super::{BatchClaim, DedupStore, FoldOutcome, PaymentStore, Publish, ensure_transition};
use crate::error::{SettlementError, SettlementResult};
use crate::types::{
    ConsolidatedRequest, ConsolidationGroup, ExecutionRequest, FileDeduplication, FileStatus,
    Frequency, PaymentMethodType, PaymentStatus, RecordDeduplication, RecordStatus, RequestType,
};

#[derive(Default)]
struct State {
    requests: BTreeMap<i64, ExecutionRequest>,
    batches: BTreeMap<i64, ConsolidatedRequest>,
    next_request_id: i64,
    next_batch_id: i64,
    files: HashMap<Uuid, FileDeduplication>,
    records: HashMap<Uuid, RecordDeduplication>,
}

#[derive(Default)]
pub struct MockStore {
    state: Mutex<State>,
    /// Remaining injected failures per operation name
    fail_ops: Mutex<HashMap<&'static str, usize>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` with a database error.
    pub fn set_fail(&self, op: &'static str, times: usize) {
        self.fail_ops.lock().unwrap().insert(op, times);
    }

    fn check(&self, op: &'static str) -> SettlementResult<()> {
        let mut ops = self.fail_ops.lock().unwrap();
        if let Some(remaining) = ops.get_mut(op)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(SettlementError::Database(format!("mock failure in {}", op)));
        }
        Ok(())
    }

    pub fn request(&self, id: i64) -> ExecutionRequest {
        self.state.lock().unwrap().requests[&id].clone()
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .values()
            .cloned()
            .collect()
    }

    pub fn batch(&self, id: i64) -> ConsolidatedRequest {
        self.state.lock().unwrap().batches[&id].clone()
    }

    pub fn batches(&self) -> Vec<ConsolidatedRequest> {
        self.state
            .lock()
            .unwrap()
            .batches
            .values()
            .cloned()
            .collect()
    }

    pub fn set_request_status(&self, id: i64, status: PaymentStatus) {
        if let Some(r) = self.state.lock().unwrap().requests.get_mut(&id) {
            r.status = status;
        }
    }

    pub fn set_batch_status(&self, id: i64, status: PaymentStatus) {
        if let Some(b) = self.state.lock().unwrap().batches.get_mut(&id) {
            b.status = status;
        }
    }

    pub fn set_batch_retry_count(&self, id: i64, retry_count: i32) {
        if let Some(b) = self.state.lock().unwrap().batches.get_mut(&id) {
            b.retry_count = retry_count;
        }
    }

    pub fn files(&self) -> Vec<FileDeduplication> {
        self.state
            .lock()
            .unwrap()
            .files
            .values()
            .cloned()
            .collect()
    }

    pub fn records(&self, file_id: Uuid) -> Vec<RecordDeduplication> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.file_id == file_id)
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn set_record_state(&self, record_id: Uuid, status: RecordStatus, updated_at: DateTime<Utc>) {
        if let Some(r) = self.state.lock().unwrap().records.get_mut(&record_id) {
            r.status = status;
            r.updated_at = updated_at;
        }
    }
}

fn page<T: Clone>(
    rows: impl Iterator<Item = (i64, T)>,
    after_id: i64,
    limit: i64,
) -> Vec<T> {
    rows.filter(|(id, _)| *id > after_id)
        .take(limit.max(0) as usize)
        .map(|(_, row)| row)
        .collect()
}

#[async_trait]
impl PaymentStore for MockStore {
    async fn insert_execution_request(&self, request: &ExecutionRequest) -> SettlementResult<i64> {
        self.check("insert_execution_request")?;
        let mut s = self.state.lock().unwrap();
        if s.requests
            .values()
            .any(|r| r.payment_id == request.payment_id)
        {
            return Err(SettlementError::Duplicate(request.payment_id.clone()));
        }
        s.next_request_id += 1;
        let id = s.next_request_id;
        let mut row = request.clone();
        row.id = id;
        s.requests.insert(id, row);
        Ok(id)
    }

    async fn get_execution_request(&self, id: i64) -> SettlementResult<Option<ExecutionRequest>> {
        Ok(self.state.lock().unwrap().requests.get(&id).cloned())
    }

    async fn get_batch(&self, id: i64) -> SettlementResult<Option<ConsolidatedRequest>> {
        Ok(self.state.lock().unwrap().batches.get(&id).cloned())
    }

    async fn fetch_consolidation_candidates(
        &self,
        request_type: RequestType,
        frequency: Option<Frequency>,
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        self.check("fetch_consolidation_candidates")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.requests
                .values()
                .filter(|r| {
                    r.request_type == request_type
                        && frequency.is_none_or(|f| r.frequency == f)
                        && r.payment_date <= up_to
                        && (r.status == PaymentStatus::New
                            || (r.status == PaymentStatus::Consolidated
                                && r.consolidated_request_id.is_none()))
                })
                .map(|r| (r.id, r.clone())),
            0,
            limit,
        ))
    }

    async fn mark_consolidated(&self, ids: &[i64]) -> SettlementResult<u64> {
        self.check("mark_consolidated")?;
        let mut s = self.state.lock().unwrap();
        let mut count = 0;
        for id in ids {
            if let Some(r) = s.requests.get_mut(id)
                && (r.status == PaymentStatus::New
                    || (r.status == PaymentStatus::Consolidated
                        && r.consolidated_request_id.is_none()))
            {
                r.status = PaymentStatus::Consolidated;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn fold_into_batch(&self, group: &ConsolidationGroup) -> SettlementResult<FoldOutcome> {
        self.check("fold_into_batch")?;
        let mut s = self.state.lock().unwrap();
        let existing = s
            .batches
            .values()
            .find(|b| {
                b.account_identifier == group.key.account_identifier
                    && b.routing_number == group.key.routing_number
                    && b.request_type == group.key.request_type
                    && b.payment_date == group.payment_date
                    && b.status.is_open()
                    && b.settlement_identifier.is_none()
            })
            .map(|b| b.id);

        let outcome = match existing {
            Some(batch_id) => {
                if let Some(batch) = s.batches.get_mut(&batch_id) {
                    batch.amount += group.amount;
                }
                FoldOutcome {
                    batch_id,
                    created: false,
                }
            }
            None => {
                s.next_batch_id += 1;
                let batch_id = s.next_batch_id;
                s.batches.insert(
                    batch_id,
                    ConsolidatedRequest {
                        id: batch_id,
                        account_identifier: group.key.account_identifier.clone(),
                        routing_number: group.key.routing_number.clone(),
                        amount: group.amount,
                        payment_date: group.payment_date,
                        request_type: group.key.request_type,
                        extended_data: group.extended_data.clone(),
                        retry_count: 0,
                        status: PaymentStatus::New,
                        settlement_identifier: None,
                        last4_account_identifier: group.last4_account_identifier.clone(),
                    },
                );
                FoldOutcome {
                    batch_id,
                    created: true,
                }
            }
        };

        for id in &group.member_ids {
            if let Some(r) = s.requests.get_mut(id) {
                r.consolidated_request_id = Some(outcome.batch_id);
            }
        }
        Ok(outcome)
    }

    async fn fetch_open_batches(
        &self,
        request_types: &[RequestType],
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ConsolidatedRequest>> {
        self.check("fetch_open_batches")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.batches
                .values()
                .filter(|b| {
                    request_types.contains(&b.request_type)
                        && b.status.is_open()
                        && b.payment_date <= up_to
                })
                .map(|b| (b.id, b.clone())),
            0,
            limit,
        ))
    }

    async fn fetch_individual_requests(
        &self,
        request_types: &[RequestType],
        method: PaymentMethodType,
        frequency: Option<Frequency>,
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        self.check("fetch_individual_requests")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.requests
                .values()
                .filter(|r| {
                    request_types.contains(&r.request_type)
                        && r.method_type == method
                        && frequency.is_none_or(|f| r.frequency == f)
                        && r.status.is_open()
                        && r.payment_date <= up_to
                })
                .map(|r| (r.id, r.clone())),
            0,
            limit,
        ))
    }

    async fn assign_batch_settlement_id(
        &self,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<BatchClaim> {
        self.check("assign_settlement_id")?;
        let mut s = self.state.lock().unwrap();
        let batch = s
            .batches
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("batch {}", id)))?;
        let settlement_identifier = batch
            .settlement_identifier
            .get_or_insert_with(|| settlement_id.to_string())
            .clone();
        Ok(BatchClaim {
            settlement_identifier,
            amount: batch.amount,
        })
    }

    async fn assign_request_settlement_id(
        &self,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<String> {
        self.check("assign_settlement_id")?;
        let mut s = self.state.lock().unwrap();
        let request = s
            .requests
            .get_mut(&id)
            .ok_or_else(|| SettlementError::NotFound(format!("request {}", id)))?;
        Ok(request
            .settlement_identifier
            .get_or_insert_with(|| settlement_id.to_string())
            .clone())
    }

    async fn increment_batch_retry(&self, ids: &[i64]) -> SettlementResult<u64> {
        self.check("increment_batch_retry")?;
        let mut s = self.state.lock().unwrap();
        let mut count = 0;
        for id in ids {
            if let Some(b) = s.batches.get_mut(id) {
                b.retry_count += 1;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn mark_batch_errored(&self, id: i64) -> SettlementResult<bool> {
        self.check("mark_batch_errored")?;
        let mut s = self.state.lock().unwrap();
        match s.batches.get_mut(&id) {
            Some(b) if b.status.is_open() => {
                b.status = PaymentStatus::Errored;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_batches_in_progress(&self, ids: &[i64]) -> SettlementResult<u64> {
        self.check("mark_batches_in_progress")?;
        let mut s = self.state.lock().unwrap();
        let mut count = 0;
        for id in ids {
            if let Some(b) = s.batches.get_mut(id)
                && b.status.is_open()
            {
                b.status = PaymentStatus::InProgress;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn fetch_batch_members(
        &self,
        batch_ids: &[i64],
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        self.check("fetch_batch_members")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.requests
                .values()
                .filter(|r| {
                    r.consolidated_request_id
                        .is_some_and(|batch| batch_ids.contains(&batch))
                })
                .map(|r| (r.id, r.clone())),
            after_id,
            limit,
        ))
    }

    async fn fetch_requests_by_status(
        &self,
        status: PaymentStatus,
        due_by: NaiveDate,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        self.check("fetch_requests_by_status")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.requests
                .values()
                .filter(|r| r.status == status && r.payment_date <= due_by)
                .map(|r| (r.id, r.clone())),
            after_id,
            limit,
        ))
    }

    async fn fetch_batches_by_status(
        &self,
        status: PaymentStatus,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ConsolidatedRequest>> {
        self.check("fetch_batches_by_status")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.batches
                .values()
                .filter(|b| b.status == status)
                .map(|b| (b.id, b.clone())),
            after_id,
            limit,
        ))
    }

    async fn fetch_settled_members(
        &self,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        self.check("fetch_settled_members")?;
        let s = self.state.lock().unwrap();
        Ok(page(
            s.requests
                .values()
                .filter(|r| {
                    r.status == PaymentStatus::Consolidated
                        && r.consolidated_request_id
                            .and_then(|batch| s.batches.get(&batch))
                            .is_some_and(|b| b.status == PaymentStatus::Completed)
                })
                .map(|r| (r.id, r.clone())),
            after_id,
            limit,
        ))
    }

    async fn transition_request_then(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        ensure_transition(from, to)?;
        self.check("transition_request")?;
        {
            let mut s = self.state.lock().unwrap();
            match s.requests.get_mut(&id) {
                Some(r) if r.status == from => r.status = to,
                _ => return Ok(false),
            }
        }
        if let Err(e) = publish.await {
            if let Some(r) = self.state.lock().unwrap().requests.get_mut(&id) {
                r.status = from;
            }
            return Err(e);
        }
        Ok(true)
    }

    async fn transition_batch_then(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        ensure_transition(from, to)?;
        self.check("transition_batch")?;
        {
            let mut s = self.state.lock().unwrap();
            match s.batches.get_mut(&id) {
                Some(b) if b.status == from => b.status = to,
                _ => return Ok(false),
            }
        }
        if let Err(e) = publish.await {
            if let Some(b) = self.state.lock().unwrap().batches.get_mut(&id) {
                b.status = from;
            }
            return Err(e);
        }
        Ok(true)
    }

    async fn find_batch_by_settlement_id(
        &self,
        settlement_id: &str,
    ) -> SettlementResult<Option<ConsolidatedRequest>> {
        self.check("find_by_settlement_id")?;
        let s = self.state.lock().unwrap();
        Ok(s.batches
            .values()
            .find(|b| b.settlement_identifier.as_deref() == Some(settlement_id))
            .cloned())
    }

    async fn find_request_by_settlement_id(
        &self,
        settlement_id: &str,
    ) -> SettlementResult<Option<ExecutionRequest>> {
        self.check("find_by_settlement_id")?;
        let s = self.state.lock().unwrap();
        Ok(s.requests
            .values()
            .find(|r| r.settlement_identifier.as_deref() == Some(settlement_id))
            .cloned())
    }
}

#[async_trait]
impl DedupStore for MockStore {
    async fn find_file(
        &self,
        file_hash: &str,
        since: DateTime<Utc>,
    ) -> SettlementResult<Option<FileDeduplication>> {
        self.check("find_file")?;
        let s = self.state.lock().unwrap();
        Ok(s.files
            .values()
            .filter(|f| f.file_hash == file_hash && f.created_at >= since)
            .max_by_key(|f| f.created_at)
            .cloned())
    }

    async fn get_file(&self, file_id: Uuid) -> SettlementResult<Option<FileDeduplication>> {
        Ok(self.state.lock().unwrap().files.get(&file_id).cloned())
    }

    async fn claim_file(&self, file: &FileDeduplication) -> SettlementResult<()> {
        self.check("claim_file")?;
        let mut s = self.state.lock().unwrap();
        if s.files.contains_key(&file.file_id) {
            return Err(SettlementError::Duplicate(file.file_id.to_string()));
        }
        let mut row = file.clone();
        row.status = FileStatus::InProgress;
        s.files.insert(file.file_id, row);
        Ok(())
    }

    async fn reclaim_file(&self, file_id: Uuid, total_record_count: i32) -> SettlementResult<bool> {
        self.check("reclaim_file")?;
        let mut s = self.state.lock().unwrap();
        match s.files.get_mut(&file_id) {
            Some(f) if f.status == FileStatus::Retry => {
                f.status = FileStatus::InProgress;
                f.total_record_count = total_record_count;
                f.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_file_retry(&self, file_id: Uuid) -> SettlementResult<bool> {
        let mut s = self.state.lock().unwrap();
        match s.files.get_mut(&file_id) {
            Some(f) if f.status != FileStatus::Complete => {
                f.status = FileStatus::Retry;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_record(
        &self,
        file_id: Uuid,
        record_hash: &str,
    ) -> SettlementResult<Option<RecordDeduplication>> {
        self.check("find_record")?;
        let s = self.state.lock().unwrap();
        Ok(s.records
            .values()
            .find(|r| r.file_id == file_id && r.record_hash == record_hash)
            .cloned())
    }

    async fn claim_record_then(
        &self,
        record: &RecordDeduplication,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        self.check("claim_record")?;
        {
            let mut s = self.state.lock().unwrap();
            if s.records
                .values()
                .any(|r| r.file_id == record.file_id && r.record_hash == record.record_hash)
            {
                return Ok(false);
            }
            let mut row = record.clone();
            row.status = RecordStatus::InProgress;
            row.updated_at = Utc::now();
            s.records.insert(record.record_id, row);
        }
        if let Err(e) = publish.await {
            self.state.lock().unwrap().records.remove(&record.record_id);
            return Err(e);
        }
        Ok(true)
    }

    async fn reclaim_record_then(
        &self,
        file_id: Uuid,
        record_id: Uuid,
        stale_before: DateTime<Utc>,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        self.check("reclaim_record")?;
        let previous = {
            let mut s = self.state.lock().unwrap();
            match s.records.get_mut(&record_id) {
                Some(r)
                    if r.file_id == file_id
                        && (r.status == RecordStatus::Errored
                            || (r.status == RecordStatus::InProgress
                                && r.updated_at < stale_before)) =>
                {
                    let previous = r.clone();
                    r.status = RecordStatus::InProgress;
                    r.updated_at = Utc::now();
                    previous
                }
                _ => return Ok(false),
            }
        };
        if let Err(e) = publish.await {
            self.state
                .lock()
                .unwrap()
                .records
                .insert(record_id, previous);
            return Err(e);
        }
        Ok(true)
    }

    async fn record_failed(&self, file_id: Uuid, record_id: Uuid) -> SettlementResult<bool> {
        self.check("record_failed")?;
        let mut s = self.state.lock().unwrap();
        match s.records.get_mut(&record_id) {
            Some(r) if r.file_id == file_id && r.status != RecordStatus::Complete => {
                r.status = RecordStatus::Errored;
                r.updated_at = Utc::now();
            }
            _ => return Ok(false),
        }
        if let Some(f) = s.files.get_mut(&file_id)
            && f.status != FileStatus::Complete
        {
            f.status = FileStatus::Incomplete;
        }
        Ok(true)
    }

    async fn record_completed(&self, file_id: Uuid, record_id: Uuid) -> SettlementResult<bool> {
        self.check("record_completed")?;
        let mut s = self.state.lock().unwrap();
        match s.records.get_mut(&record_id) {
            Some(r) if r.file_id == file_id && r.status != RecordStatus::Complete => {
                r.status = RecordStatus::Complete;
                r.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_completed_records(&self, file_id: Uuid) -> SettlementResult<i64> {
        self.check("count_completed_records")?;
        let s = self.state.lock().unwrap();
        Ok(s.records
            .values()
            .filter(|r| r.file_id == file_id && r.status == RecordStatus::Complete)
            .count() as i64)
    }

    async fn complete_file_then(
        &self,
        file_id: Uuid,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        self.check("complete_file")?;
        let previous = {
            let mut s = self.state.lock().unwrap();
            match s.files.get_mut(&file_id) {
                Some(f) if f.status != FileStatus::Complete => {
                    let previous = f.status;
                    f.status = FileStatus::Complete;
                    previous
                }
                _ => return Ok(false),
            }
        };
        if let Err(e) = publish.await {
            if let Some(f) = self.state.lock().unwrap().files.get_mut(&file_id) {
                f.status = previous;
            }
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_transition_rolls_back_on_failed_publish() {
        let store = MockStore::new();
        let id = store
            .insert_execution_request(&crate::testkit::request("p-1", "enc:1", "20.16"))
            .await
            .unwrap();
        store.set_request_status(id, PaymentStatus::InProgress);

        let result = store
            .transition_request_then(
                id,
                PaymentStatus::InProgress,
                PaymentStatus::Completed,
                async { Err(SettlementError::Bus("down".into())) }.boxed(),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.request(id).status, PaymentStatus::InProgress);

        let applied = store
            .transition_request_then(
                id,
                PaymentStatus::InProgress,
                PaymentStatus::Completed,
                async { Ok(()) }.boxed(),
            )
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(store.request(id).status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_injected_failure_counts_down() {
        let store = MockStore::new();
        store.set_fail("mark_consolidated", 1);
        assert!(store.mark_consolidated(&[1]).await.is_err());
        assert!(store.mark_consolidated(&[1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_transition_outside_lifecycle_rejected() {
        let store = MockStore::new();
        let id = store
            .insert_execution_request(&crate::testkit::request("p-1", "enc:1", "1.00"))
            .await
            .unwrap();
        store.set_request_status(id, PaymentStatus::Completed);

        let published = std::sync::atomic::AtomicBool::new(false);
        let err = store
            .transition_request_then(
                id,
                PaymentStatus::Completed,
                PaymentStatus::InProgress,
                async {
                    published.store(true, std::sync::atomic::Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert!(!published.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(store.request(id).status, PaymentStatus::Completed);
    }
}
