//! Settlement Worker - long-running loops
//!
//! - scheduler: one settle task for today every `schedule_interval_secs`
//! - inbound: poll every configured folder every `poll_interval_secs`
//! - consumers: record processing, record feedback, file completion
//!
//! All loops stop at the next suspension point once the token is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::{Clock, MessageConsumer, MessageHandler};
use crate::config::TopicConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::inbound::{AckRecordProcessor, FeedbackConsumer, InboundPoller};
use crate::reconcile::CompletionReconciler;
use crate::task::{SettleTask, SettlementRunner, TaskResponse};
use crate::types::PaymentMethodType;

const CONSUMER_IDLE: Duration = Duration::from_millis(500);

/// Sleep for `period` unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// Handle messages on `topic` until it is empty or a handler fails.
pub async fn drain(
    consumer: &dyn MessageConsumer,
    topic: &str,
    handler: &dyn MessageHandler,
    cancel: &CancellationToken,
) -> SettlementResult<usize> {
    let mut handled = 0;
    while !cancel.is_cancelled() && consumer.poll(topic, handler).await? {
        handled += 1;
    }
    Ok(handled)
}

pub struct SettlementWorker {
    runner: Arc<SettlementRunner>,
    poller: Arc<InboundPoller>,
    consumer: Arc<dyn MessageConsumer>,
    ack: Arc<AckRecordProcessor>,
    feedback: Arc<FeedbackConsumer>,
    reconciler: Arc<CompletionReconciler>,
    clock: Arc<dyn Clock>,
    topics: TopicConfig,
    schedule_interval: Duration,
    poll_interval: Duration,
}

impl SettlementWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<SettlementRunner>,
        poller: Arc<InboundPoller>,
        consumer: Arc<dyn MessageConsumer>,
        ack: Arc<AckRecordProcessor>,
        feedback: Arc<FeedbackConsumer>,
        reconciler: Arc<CompletionReconciler>,
        clock: Arc<dyn Clock>,
        topics: TopicConfig,
        schedule_interval: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runner,
            poller,
            consumer,
            ack,
            feedback,
            reconciler,
            clock,
            topics,
            schedule_interval,
            poll_interval,
        }
    }

    /// Settle everything due today for ACH, all request types.
    pub async fn settle_today(&self, cancel: &CancellationToken) -> TaskResponse {
        let task = SettleTask {
            task_date: self.clock.today(),
            request_types: Vec::new(),
            method_type: PaymentMethodType::Ach.id(),
            frequency: None,
        };
        self.runner.run_settle_task(&task, cancel.child_token()).await
    }

    /// Send an inbound file back through processing on the next poll.
    pub async fn retry_file(&self, file_id: uuid::Uuid) -> SettlementResult<bool> {
        self.poller.mark_for_retry(file_id).await
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            schedule = ?self.schedule_interval,
            poll = ?self.poll_interval,
            "Settlement worker starting"
        );
        futures::join!(
            self.run_scheduler(&cancel),
            self.run_inbound(&cancel),
            self.run_consumer(&cancel, &self.topics.record_processing, self.ack.as_ref()),
            self.run_consumer(&cancel, &self.topics.record_feedback, self.feedback.as_ref()),
            self.run_consumer(
                &cancel,
                &self.topics.file_processing_completed,
                self.reconciler.as_ref()
            ),
        );
        info!("Settlement worker stopped");
    }

    async fn run_scheduler(&self, cancel: &CancellationToken) {
        loop {
            let response = self.settle_today(cancel).await;
            if let Some(e) = &response.error {
                warn!(processed = response.processed_count, error_type = %e.error_type, "Scheduled settlement failed");
            }
            if !pause(cancel, self.schedule_interval).await {
                return;
            }
        }
    }

    async fn run_inbound(&self, cancel: &CancellationToken) {
        loop {
            match self.poller.poll_all(cancel).await {
                Ok(report) => {
                    if !report.outcomes.is_empty() || report.failed > 0 {
                        info!(files = report.outcomes.len(), failed = report.failed, "Inbound poll finished");
                    }
                }
                Err(SettlementError::Cancelled) => return,
                Err(e) => error!(error = %e, "Inbound poll failed"),
            }
            if !pause(cancel, self.poll_interval).await {
                return;
            }
        }
    }

    async fn run_consumer(&self, cancel: &CancellationToken, topic: &str, handler: &dyn MessageHandler) {
        loop {
            match drain(self.consumer.as_ref(), topic, handler, cancel).await {
                Ok(handled) if handled > 0 => debug!(topic, handled, "Messages handled"),
                Ok(_) => {}
                Err(e) => warn!(topic, error = %e, "Message handling failed, will redeliver"),
            }
            if !pause(cancel, CONSUMER_IDLE).await {
                return;
            }
        }
    }
}
