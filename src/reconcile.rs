//! Completion Reconciler
//!
//! Runs when a file of the completion business type finishes processing:
//!
//! 1. Individual: due `InProgress` requests (payment date on or before today) → `Completed`
//!    + response + `PaymentSettled`
//! 2. Consolidated: `InProgress` batches → `Completed` + consolidated response
//! 3. Members: `Consolidated` requests of completed batches → `Completed` + response +
//!    `PaymentSettled`, carrying the batch's settlement identifier
//!
//! Every status change commits only if its events were published. A row whose publish
//! failed keeps its status and is picked up by the next pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::adapters::{AccountCipher, Clock, MessageBus, MessageHandler, publish_json};
use crate::config::TopicConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::events::{
    ConsolidatedExecutePaymentResponse, ExecutePaymentResponse, FileProcessingCompleted,
    PaymentEvent, PaymentEventType,
};
use crate::store::PaymentStore;
use crate::types::{ExecutionRequest, PaymentStatus, last4};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub requests_completed: usize,
    pub batches_completed: usize,
    pub members_completed: usize,
    pub failures: usize,
}

pub struct CompletionReconciler {
    store: Arc<dyn PaymentStore>,
    bus: Arc<dyn MessageBus>,
    cipher: Arc<dyn AccountCipher>,
    clock: Arc<dyn Clock>,
    topics: TopicConfig,
    business_file_type: String,
    page_size: i64,
}

impl CompletionReconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        bus: Arc<dyn MessageBus>,
        cipher: Arc<dyn AccountCipher>,
        clock: Arc<dyn Clock>,
        topics: TopicConfig,
        business_file_type: String,
        page_size: i64,
    ) -> Self {
        Self {
            store,
            bus,
            cipher,
            clock,
            topics,
            business_file_type,
            page_size,
        }
    }

    pub async fn reconcile(&self) -> SettlementResult<CompletionReport> {
        let mut report = CompletionReport::default();
        self.complete_requests(&mut report).await?;
        self.complete_batches(&mut report).await?;
        self.complete_members(&mut report).await?;
        info!(
            requests = report.requests_completed,
            batches = report.batches_completed,
            members = report.members_completed,
            failures = report.failures,
            "Completion pass finished"
        );
        Ok(report)
    }

    async fn complete_requests(&self, report: &mut CompletionReport) -> SettlementResult<()> {
        let today = self.clock.today();
        let mut after_id = 0;
        loop {
            let page = self
                .store
                .fetch_requests_by_status(PaymentStatus::InProgress, today, after_id, self.page_size)
                .await
                .map_err(|e| e.context("fetch_requests_by_status", after_id))?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            for request in &page {
                match self.complete_request(request, PaymentStatus::InProgress, None).await {
                    Ok(true) => report.requests_completed += 1,
                    Ok(false) => debug!(request_id = request.id, "Request no longer in progress"),
                    Err(e) => {
                        error!(request_id = request.id, error = %e, "Request completion rolled back");
                        report.failures += 1;
                    }
                }
            }

            if (page.len() as i64) < self.page_size {
                break;
            }
        }
        Ok(())
    }

    async fn complete_batches(&self, report: &mut CompletionReport) -> SettlementResult<()> {
        let mut after_id = 0;
        loop {
            let page = self
                .store
                .fetch_batches_by_status(PaymentStatus::InProgress, after_id, self.page_size)
                .await
                .map_err(|e| e.context("fetch_batches_by_status", after_id))?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            for batch in &page {
                let mut completed = batch.clone();
                completed.status = PaymentStatus::Completed;
                let response = ConsolidatedExecutePaymentResponse::from(&completed);
                let bus = self.bus.as_ref();
                let topic = self.topics.consolidated_payment_response.as_str();
                let publish = async move { publish_json(bus, topic, &response).await }.boxed();

                match self
                    .store
                    .transition_batch_then(
                        batch.id,
                        PaymentStatus::InProgress,
                        PaymentStatus::Completed,
                        publish,
                    )
                    .await
                {
                    Ok(true) => report.batches_completed += 1,
                    Ok(false) => debug!(batch_id = batch.id, "Batch no longer in progress"),
                    Err(e) => {
                        error!(batch_id = batch.id, error = %e, "Batch completion rolled back");
                        report.failures += 1;
                    }
                }
            }

            if (page.len() as i64) < self.page_size {
                break;
            }
        }
        Ok(())
    }

    async fn complete_members(&self, report: &mut CompletionReport) -> SettlementResult<()> {
        let mut settlement_ids: HashMap<i64, Option<String>> = HashMap::new();
        let mut after_id = 0;
        loop {
            let page = self
                .store
                .fetch_settled_members(after_id, self.page_size)
                .await
                .map_err(|e| e.context("fetch_settled_members", after_id))?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            for member in &page {
                let settlement_id = match member.consolidated_request_id {
                    Some(batch_id) => match settlement_ids.get(&batch_id) {
                        Some(cached) => cached.clone(),
                        None => {
                            let id = self
                                .store
                                .get_batch(batch_id)
                                .await?
                                .and_then(|b| b.settlement_identifier);
                            settlement_ids.insert(batch_id, id.clone());
                            id
                        }
                    },
                    None => None,
                };

                match self
                    .complete_request(member, PaymentStatus::Consolidated, settlement_id)
                    .await
                {
                    Ok(true) => report.members_completed += 1,
                    Ok(false) => debug!(request_id = member.id, "Member no longer consolidated"),
                    Err(e) => {
                        error!(request_id = member.id, error = %e, "Member completion rolled back");
                        report.failures += 1;
                    }
                }
            }

            if (page.len() as i64) < self.page_size {
                break;
            }
        }
        Ok(())
    }

    /// `from` → `Completed`, gated on the response and `PaymentSettled` publishing.
    async fn complete_request(
        &self,
        request: &ExecutionRequest,
        from: PaymentStatus,
        settlement_id: Option<String>,
    ) -> SettlementResult<bool> {
        let account = self
            .cipher
            .decrypt(&request.account_identifier)
            .map_err(|e| e.context("decrypt_account", request.id))?;

        let mut completed = request.clone();
        if let Some(settlement_id) = settlement_id
            && completed.settlement_identifier.is_none()
        {
            completed.settlement_identifier = Some(
                self.store
                    .assign_request_settlement_id(request.id, &settlement_id)
                    .await?,
            );
        }
        completed.status = PaymentStatus::Completed;

        let response = ExecutePaymentResponse::for_request(&completed, last4(&account));
        let event = PaymentEvent::new(&completed, PaymentEventType::PaymentSettled, self.clock.now());
        let bus = self.bus.as_ref();
        let topics = &self.topics;
        let publish = async move {
            publish_json(bus, &topics.execute_payment_response, &response).await?;
            publish_json(bus, &topics.payment_event, &event).await
        }
        .boxed();

        self.store
            .transition_request_then(request.id, from, PaymentStatus::Completed, publish)
            .await
    }
}

#[async_trait]
impl MessageHandler for CompletionReconciler {
    /// Rows left behind by failed publishes make the message fail so it is redelivered.
    async fn handle(&self, payload: &[u8]) -> SettlementResult<()> {
        let completed: FileProcessingCompleted = serde_json::from_slice(payload)?;
        if completed.business_file_type != self.business_file_type {
            debug!(business_file_type = %completed.business_file_type, "Not a completion file type");
            return Ok(());
        }
        let report = self.reconcile().await?;
        if report.failures > 0 {
            return Err(SettlementError::Bus(format!(
                "{} completions rolled back",
                report.failures
            )));
        }
        Ok(())
    }
}
