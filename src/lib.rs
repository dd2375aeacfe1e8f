//! ACH Settlement - payment consolidation and acknowledgment reconciliation
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Consolidation│──▶│  Outbound  │──▶│ NACHA upload │──▶│   Bank   │
//! │ (lock 7001)  │   │ (lock 7002)│   └──────────────┘   └────┬─────┘
//! └──────────────┘   └────────────┘                           │ ack file
//!        ▲                                                    ▼
//! ┌──────┴───────┐   ┌──────────────┐   ┌──────────────────────────┐
//! │  Completion  │◀──│   Feedback   │◀──│ Inbound poller (lock 7003)│
//! │  Reconciler  │   │   consumer   │   │ file + record dedup       │
//! └──────────────┘   └──────────────┘   └──────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`] - Status/type codes, execution and consolidated requests, dedup rows
//! - [`lock`] - Cluster-wide named locks over Postgres advisory locks
//! - [`store`] - Relational state (`PaymentStore`, `DedupStore`)
//! - [`adapters`] - Message bus, blob store, cipher, clock
//! - [`consolidation`] - Folds due requests into consolidated batches
//! - [`nacha`] - Fixed-width settlement file codec
//! - [`outbound`] - Settlement file generation pipeline
//! - [`inbound`] - Acknowledgment file ingestion with dedup
//! - [`reconcile`] - Completion of settled payments
//! - [`task`] - Settle task validation and orchestration
//! - [`worker`] - Long-running loops

pub mod adapters;
pub mod config;
pub mod consolidation;
pub mod db;
pub mod error;
pub mod events;
pub mod inbound;
pub mod lock;
pub mod logging;
pub mod money;
pub mod nacha;
pub mod outbound;
pub mod reconcile;
pub mod store;
pub mod task;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testkit;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use consolidation::ConsolidationEngine;
pub use error::{PartialFailure, SettlementError, SettlementResult, TaskError};
pub use inbound::{AckRecordProcessor, FeedbackConsumer, InboundPoller};
pub use lock::{LockCoordinator, LockResource};
pub use outbound::{OutboundSettlementPipeline, SettlementSource};
pub use reconcile::CompletionReconciler;
pub use task::{SettleTask, SettlementRunner, TaskContext, TaskResponse};
pub use types::{ConsolidatedRequest, ExecutionRequest, PaymentStatus, RequestType};
pub use worker::SettlementWorker;
