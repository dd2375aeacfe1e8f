//! Consolidation Engine
//!
//! Folds due `New` execution requests into consolidated batches, one bounded fetch at a
//! time, per consolidating request type:
//!
//! ```text
//! fetch (≤ fetch_batch_size, id asc) → claim (status CONSOLIDATED)
//!   → group by (type, account, routing) → per group: fold into open batch + back-fill ids
//! ```
//!
//! Always runs inside the "consolidate payments" lock. A batch is found for folding only
//! while it is open (`New`/`Accepted`) and holds no settlement id; once claimed by an
//! outbound run, new requests start a fresh batch. A task frequency narrows the candidates.
//! Rows claimed by a run that died before folding are picked up again by the next run.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::adapters::AccountCipher;
use crate::error::{CountedResult, PartialFailure, SettlementError, SettlementResult};
use crate::store::PaymentStore;
use crate::task::TaskContext;
use crate::types::{ConsolidationGroup, ConsolidationKey, ExecutionRequest, RequestType, last4};

pub struct ConsolidationEngine {
    store: Arc<dyn PaymentStore>,
    cipher: Arc<dyn AccountCipher>,
    request_types: Vec<RequestType>,
    fetch_batch_size: i64,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        cipher: Arc<dyn AccountCipher>,
        request_types: Vec<RequestType>,
        fetch_batch_size: i64,
    ) -> Self {
        Self {
            store,
            cipher,
            request_types,
            fetch_batch_size,
        }
    }

    /// Consolidate every due request of the configured types. Returns the number of
    /// claimed rows; on failure, the count accumulated before the failing step.
    pub async fn consolidate_payment_requests(&self, ctx: &TaskContext) -> CountedResult {
        let mut total = 0usize;

        for &request_type in self.request_types.iter().filter(|t| ctx.includes(**t)) {
            let mut claimed_for_type = 0usize;
            loop {
                if ctx.cancel.is_cancelled() {
                    warn!(processed = total, "Consolidation cancelled");
                    return Err(PartialFailure::new(total, SettlementError::Cancelled));
                }

                match self.consolidate_batch(ctx, request_type).await {
                    Ok(0) => break,
                    Ok(claimed) => {
                        total += claimed;
                        claimed_for_type += claimed;
                    }
                    Err(e) => {
                        tracing::error!(
                            request_type = %request_type,
                            processed = total,
                            error = %e,
                            "Consolidation aborted"
                        );
                        return Err(PartialFailure::new(total, e));
                    }
                }
            }
            info!(request_type = %request_type, claimed = claimed_for_type, "Request type consolidated");
        }

        Ok(total)
    }

    /// One fetch-claim-fold round. Returns the number of rows claimed, zero when drained.
    async fn consolidate_batch(
        &self,
        ctx: &TaskContext,
        request_type: RequestType,
    ) -> SettlementResult<usize> {
        let task_date = ctx.task_date;
        let rows = self
            .store
            .fetch_consolidation_candidates(
                request_type,
                ctx.frequency,
                task_date,
                self.fetch_batch_size,
            )
            .await
            .map_err(|e| e.context("fetch_consolidation_candidates", request_type))?;
        if rows.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        self.store
            .mark_consolidated(&ids)
            .await
            .map_err(|e| e.context("mark_consolidated", ids[0]))?;

        let groups = group_requests(&rows, task_date, self.cipher.as_ref())?;
        for group in &groups {
            let outcome = self
                .store
                .fold_into_batch(group)
                .await
                .map_err(|e| e.context("fold_into_batch", group.member_ids[0]))?;
            debug!(
                batch_id = outcome.batch_id,
                created = outcome.created,
                members = group.member_ids.len(),
                amount = %group.amount,
                "Group folded"
            );
        }

        debug!(request_type = %request_type, claimed = rows.len(), groups = groups.len(), "Batch consolidated");
        Ok(rows.len())
    }
}

/// Group claimed rows by [`ConsolidationKey`], summing amounts exactly.
///
/// `rows` must be id-ascending: the first member of each group supplies the batch's
/// extended data and last-4. Every group is dated `batch_date`.
pub fn group_requests(
    rows: &[ExecutionRequest],
    batch_date: NaiveDate,
    cipher: &dyn AccountCipher,
) -> SettlementResult<Vec<ConsolidationGroup>> {
    let mut groups: BTreeMap<ConsolidationKey, ConsolidationGroup> = BTreeMap::new();

    for row in rows {
        match groups.entry(ConsolidationKey::of(row)) {
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                group.amount += row.amount;
                group.member_ids.push(row.id);
            }
            Entry::Vacant(entry) => {
                let plaintext = cipher
                    .decrypt(&row.account_identifier)
                    .map_err(|e| e.context("decrypt_account", row.id))?;
                let key = entry.key().clone();
                entry.insert(ConsolidationGroup {
                    key,
                    payment_date: batch_date,
                    amount: row.amount,
                    member_ids: vec![row.id],
                    extended_data: row.extended_data.clone(),
                    last4_account_identifier: last4(&plaintext),
                });
            }
        }
    }

    Ok(groups.into_values().collect())
}
