//! Settle task
//!
//! Entry point the external scheduler calls. Raw integer codes are validated into typed
//! enums before anything touches the store, then one run does:
//!
//! ```text
//! [lock consolidate_payments]   ConsolidationEngine
//! [lock create_settlement_file] Outbound(Consolidated) → Outbound(Individual)
//! ```
//!
//! `processed_count` in the response is exactly how far the run got.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::consolidation::ConsolidationEngine;
use crate::error::{PartialFailure, SettlementError, SettlementResult, TaskError};
use crate::lock::{LockCoordinator, LockResource};
use crate::outbound::{OutboundSettlementPipeline, SettlementSource};
use crate::types::{Frequency, PaymentMethodType, RequestType};

/// Raw task parameters as received from the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleTask {
    pub task_date: NaiveDate,
    /// Empty means every request type
    #[serde(default)]
    pub request_types: Vec<i16>,
    pub method_type: i16,
    #[serde(default)]
    pub frequency: Option<i16>,
}

/// Validated parameters of one run
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_date: NaiveDate,
    pub request_types: Vec<RequestType>,
    pub method_type: PaymentMethodType,
    pub frequency: Option<Frequency>,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn includes(&self, request_type: RequestType) -> bool {
        self.request_types.is_empty() || self.request_types.contains(&request_type)
    }

    /// Requested types, or every known type when none were given.
    pub fn selected_types(&self) -> Vec<RequestType> {
        if self.request_types.is_empty() {
            RequestType::ALL.to_vec()
        } else {
            self.request_types.clone()
        }
    }
}

impl SettleTask {
    pub fn validate(&self, cancel: CancellationToken) -> SettlementResult<TaskContext> {
        let request_types = self
            .request_types
            .iter()
            .map(|&code| {
                RequestType::from_id(code).ok_or_else(|| {
                    SettlementError::Validation(format!("unknown request type: {}", code))
                })
            })
            .collect::<SettlementResult<Vec<_>>>()?;

        let method_type = PaymentMethodType::from_id(self.method_type).ok_or_else(|| {
            SettlementError::Validation(format!("unknown method type: {}", self.method_type))
        })?;

        let frequency = self
            .frequency
            .map(|code| {
                Frequency::from_id(code).ok_or_else(|| {
                    SettlementError::Validation(format!("unknown frequency: {}", code))
                })
            })
            .transpose()?;

        Ok(TaskContext {
            task_date: self.task_date,
            request_types,
            method_type,
            frequency,
            cancel,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub processed_count: usize,
    pub error: Option<TaskError>,
}

impl TaskResponse {
    fn ok(processed_count: usize) -> Self {
        Self {
            processed_count,
            error: None,
        }
    }

    fn failed(processed_count: usize, error: &SettlementError) -> Self {
        Self {
            processed_count,
            error: Some(TaskError::from(error)),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct SettlementRunner {
    locks: Arc<LockCoordinator>,
    consolidation: ConsolidationEngine,
    outbound: OutboundSettlementPipeline,
}

impl SettlementRunner {
    pub fn new(
        locks: Arc<LockCoordinator>,
        consolidation: ConsolidationEngine,
        outbound: OutboundSettlementPipeline,
    ) -> Self {
        Self {
            locks,
            consolidation,
            outbound,
        }
    }

    pub async fn run_settle_task(&self, task: &SettleTask, cancel: CancellationToken) -> TaskResponse {
        let ctx = match task.validate(cancel) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "Rejected settle task");
                return TaskResponse::failed(0, &e);
            }
        };

        info!(task_date = %ctx.task_date, method = %ctx.method_type, "Settle task started");
        match self.run(&ctx).await {
            Ok(processed) => {
                info!(processed, "Settle task finished");
                TaskResponse::ok(processed)
            }
            Err(failure) => {
                error!(processed = failure.processed, error = %failure.error, "Settle task failed");
                TaskResponse::failed(failure.processed, &failure.error)
            }
        }
    }

    async fn run(&self, ctx: &TaskContext) -> Result<usize, PartialFailure> {
        let consolidated = self
            .locks
            .run_with_lock(&ctx.cancel, LockResource::ConsolidatePayments, || async {
                Ok(self.consolidation.consolidate_payment_requests(ctx).await)
            })
            .await
            .map_err(|e| PartialFailure::new(0, e))??;

        let settled = self
            .locks
            .run_with_lock(&ctx.cancel, LockResource::CreateSettlementFile, || async {
                let mut entries = 0usize;
                for source in [SettlementSource::Consolidated, SettlementSource::Individual] {
                    match self.outbound.run(ctx, source).await {
                        Ok(report) => entries += report.entries,
                        Err(failure) => {
                            return Ok(Err(PartialFailure::new(
                                entries + failure.processed,
                                failure.error,
                            )));
                        }
                    }
                }
                Ok(Ok(entries))
            })
            .await
            .map_err(|e| PartialFailure::new(consolidated, e))?
            .map_err(|f| PartialFailure::new(consolidated + f.processed, f.error))?;

        Ok(consolidated + settled)
    }
}
