//! Outbound Settlement Pipeline
//!
//! One settlement run per [`SettlementSource`], under the "create settlement file" lock:
//!
//! ```text
//! Read → (empty: done, no file)
//!   → PreProcess   claim: persist settlement identifiers (never re-derived), close batches
//!   → Map          decrypt accounts, compose payee names
//!   → Encode       NACHA text
//!   → Upload       deterministic path, overwrite on retry
//!   → PostProcess  mark IN_PROGRESS, emit SentToBank per execution request
//! ```
//!
//! PreProcess is durable before any file bytes exist, so a retried run writes the same
//! identifiers. A batch holding an identifier takes no more folds, and the amount written to
//! the file is the one read when the identifier was assigned. A failure between PreProcess and PostProcess bumps each consolidated row's
//! retry count; rows at the limit are errored at Read and left out of the file.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::adapters::{AccountCipher, BlobStore, Clock, MessageBus, publish_json};
use crate::config::{NachaConfig, SettlementConfig, TopicConfig};
use crate::error::{PartialFailure, SettlementError, SettlementResult};
use crate::events::{PaymentEvent, PaymentEventType};
use crate::nacha::{
    self, FileContext, SETTLEMENT_ID_WIDTH, SettlementKind, SettlementPayment,
    settlement_identifier,
};
use crate::store::PaymentStore;
use crate::task::TaskContext;
use crate::types::{ConsolidatedRequest, ExecutionRequest, PaymentStatus, PayeeDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementSource {
    /// Open consolidated batches
    Consolidated,
    /// Execution requests of non-consolidating types
    Individual,
}

impl SettlementSource {
    pub fn kind(&self) -> SettlementKind {
        match self {
            SettlementSource::Consolidated => SettlementKind::Consolidated,
            SettlementSource::Individual => SettlementKind::Individual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementSource::Consolidated => "consolidated",
            SettlementSource::Individual => "individual",
        }
    }
}

/// What one run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundReport {
    pub file_path: Option<String>,
    pub entries: usize,
    pub events_published: usize,
    pub publish_failures: usize,
    pub errored: usize,
}

/// A row headed for the file, whichever table it came from
#[derive(Debug, Clone)]
struct Settleable {
    id: i64,
    status: PaymentStatus,
    account_identifier: String,
    routing_number: String,
    amount: rust_decimal::Decimal,
    extended_data: PayeeDetails,
    settlement_identifier: Option<String>,
    /// Present for individual rows, used for the SentToBank event
    request: Option<ExecutionRequest>,
}

impl From<ConsolidatedRequest> for Settleable {
    fn from(batch: ConsolidatedRequest) -> Self {
        Self {
            id: batch.id,
            status: batch.status,
            account_identifier: batch.account_identifier,
            routing_number: batch.routing_number,
            amount: batch.amount,
            extended_data: batch.extended_data,
            settlement_identifier: batch.settlement_identifier,
            request: None,
        }
    }
}

impl From<ExecutionRequest> for Settleable {
    fn from(request: ExecutionRequest) -> Self {
        Self {
            id: request.id,
            status: request.status,
            account_identifier: request.account_identifier.clone(),
            routing_number: request.routing_number.clone(),
            amount: request.amount,
            extended_data: request.extended_data.clone(),
            settlement_identifier: request.settlement_identifier.clone(),
            request: Some(request),
        }
    }
}

/// Output path of a settlement file; identical inputs give identical paths.
pub fn settlement_file_path(
    folder: &str,
    source: SettlementSource,
    task_date: NaiveDate,
    first_id: i64,
    last_id: i64,
) -> String {
    format!(
        "{}/{}_{}_{}_{}.ach",
        folder.trim_end_matches('/'),
        source.as_str(),
        task_date.format("%Y%m%d"),
        first_id,
        last_id
    )
}

pub struct OutboundSettlementPipeline {
    store: Arc<dyn PaymentStore>,
    bus: Arc<dyn MessageBus>,
    blobs: Arc<dyn BlobStore>,
    cipher: Arc<dyn AccountCipher>,
    clock: Arc<dyn Clock>,
    settings: SettlementConfig,
    nacha: NachaConfig,
    topics: TopicConfig,
}

impl OutboundSettlementPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        bus: Arc<dyn MessageBus>,
        blobs: Arc<dyn BlobStore>,
        cipher: Arc<dyn AccountCipher>,
        clock: Arc<dyn Clock>,
        settings: SettlementConfig,
        nacha: NachaConfig,
        topics: TopicConfig,
    ) -> Self {
        Self {
            store,
            bus,
            blobs,
            cipher,
            clock,
            settings,
            nacha,
            topics,
        }
    }

    /// Run every stage for `source`. The failure count is the number of file entries
    /// already uploaded when the run stopped.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        source: SettlementSource,
    ) -> Result<OutboundReport, PartialFailure> {
        let mut report = OutboundReport::default();

        let mut rows = self
            .read(ctx, source, &mut report)
            .await
            .map_err(|e| PartialFailure::new(0, e))?;
        if rows.is_empty() {
            debug!(source = source.as_str(), "Nothing to settle");
            return Ok(report);
        }

        self.pre_process(source, &mut rows)
            .await
            .map_err(|e| PartialFailure::new(0, e))?;

        let path = match self.generate(ctx, source, &rows).await {
            Ok(path) => path,
            Err(e) => {
                self.record_retry(source, &rows).await;
                error!(source = source.as_str(), error = %e, "Settlement file generation failed");
                return Err(PartialFailure::new(0, e));
            }
        };
        report.file_path = Some(path.clone());
        report.entries = rows.len();
        info!(source = source.as_str(), path = %path, entries = rows.len(), "Settlement file uploaded");

        self.post_process(ctx, source, &rows, &mut report)
            .await
            .map_err(|e| PartialFailure::new(report.entries, e))?;

        if report.publish_failures > 0 {
            warn!(
                source = source.as_str(),
                failures = report.publish_failures,
                "Some SentToBank events were not published"
            );
        }
        Ok(report)
    }

    // === Read ===

    async fn read(
        &self,
        ctx: &TaskContext,
        source: SettlementSource,
        report: &mut OutboundReport,
    ) -> SettlementResult<Vec<Settleable>> {
        let consolidating = &self.settings.consolidated_request_types;
        match source {
            SettlementSource::Consolidated => {
                let types: Vec<_> = consolidating
                    .iter()
                    .copied()
                    .filter(|t| ctx.includes(*t))
                    .collect();
                if types.is_empty() {
                    return Ok(Vec::new());
                }
                let batches = self
                    .store
                    .fetch_open_batches(&types, ctx.task_date, self.settings.fetch_batch_size)
                    .await
                    .map_err(|e| e.context("fetch_open_batches", ctx.task_date))?;

                let mut rows = Vec::with_capacity(batches.len());
                for batch in batches {
                    if batch.retry_count >= self.settings.max_retry_count {
                        if self.store.mark_batch_errored(batch.id).await? {
                            warn!(batch_id = batch.id, retry_count = batch.retry_count, "Batch exceeded retry limit, errored");
                            report.errored += 1;
                        }
                        continue;
                    }
                    rows.push(Settleable::from(batch));
                }
                Ok(rows)
            }
            SettlementSource::Individual => {
                let types: Vec<_> = ctx
                    .selected_types()
                    .into_iter()
                    .filter(|t| !consolidating.contains(t))
                    .collect();
                if types.is_empty() {
                    return Ok(Vec::new());
                }
                let requests = self
                    .store
                    .fetch_individual_requests(
                        &types,
                        ctx.method_type,
                        ctx.frequency,
                        ctx.task_date,
                        self.settings.fetch_batch_size,
                    )
                    .await
                    .map_err(|e| e.context("fetch_individual_requests", ctx.task_date))?;
                Ok(requests.into_iter().map(Settleable::from).collect())
            }
        }
    }

    // === PreProcess ===

    async fn pre_process(
        &self,
        source: SettlementSource,
        rows: &mut [Settleable],
    ) -> SettlementResult<()> {
        let today = self.clock.today();
        for row in rows.iter_mut() {
            let derived = settlement_identifier(row.id, SETTLEMENT_ID_WIDTH, source.kind(), today);
            let effective = match source {
                SettlementSource::Consolidated => {
                    let claim = self
                        .store
                        .assign_batch_settlement_id(row.id, &derived)
                        .await
                        .map_err(|e| e.context("assign_settlement_id", row.id))?;
                    if claim.amount != row.amount {
                        debug!(batch_id = row.id, read = %row.amount, claimed = %claim.amount, "Batch grew before claim");
                        row.amount = claim.amount;
                    }
                    claim.settlement_identifier
                }
                SettlementSource::Individual => self
                    .store
                    .assign_request_settlement_id(row.id, &derived)
                    .await
                    .map_err(|e| e.context("assign_settlement_id", row.id))?,
            };

            if let Some(request) = row.request.as_mut() {
                request.settlement_identifier = Some(effective.clone());
            }
            row.settlement_identifier = Some(effective);
        }
        Ok(())
    }

    // === Map / Encode / Upload ===

    async fn generate(
        &self,
        ctx: &TaskContext,
        source: SettlementSource,
        rows: &[Settleable],
    ) -> SettlementResult<String> {
        let payments = rows
            .iter()
            .map(|row| self.map_payment(row))
            .collect::<SettlementResult<Vec<_>>>()?;

        let file_ctx = FileContext {
            settings: &self.nacha,
            created_at: self.clock.now().naive_utc(),
            effective_date: ctx.task_date,
            batch_number: 1,
        };
        let text = nacha::encode(&file_ctx, &payments)?;

        // rows are id-ascending from Read
        let path = settlement_file_path(
            &self.settings.outbound_folder,
            source,
            ctx.task_date,
            rows[0].id,
            rows[rows.len() - 1].id,
        );
        self.blobs.upload(&path, text.as_bytes()).await?;
        Ok(path)
    }

    fn map_payment(&self, row: &Settleable) -> SettlementResult<SettlementPayment> {
        let account_number = self
            .cipher
            .decrypt(&row.account_identifier)
            .map_err(|e| e.context("decrypt_account", row.id))?;
        let settlement_identifier = row.settlement_identifier.clone().ok_or_else(|| {
            SettlementError::InvalidState(format!("row {} has no settlement identifier", row.id))
        })?;
        Ok(SettlementPayment {
            routing_number: row.routing_number.clone(),
            account_number,
            account_type: row.extended_data.account_type,
            amount: row.amount,
            name: row.extended_data.display_name(),
            settlement_identifier,
        })
    }

    async fn record_retry(&self, source: SettlementSource, rows: &[Settleable]) {
        if source != SettlementSource::Consolidated {
            return;
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        for chunk in ids.chunks(self.settings.post_process_chunk_size.max(1)) {
            if let Err(e) = self.store.increment_batch_retry(chunk).await {
                error!(error = %e, first_id = chunk[0], "Failed to record retry");
            }
        }
    }

    // === PostProcess ===

    async fn post_process(
        &self,
        ctx: &TaskContext,
        source: SettlementSource,
        rows: &[Settleable],
        report: &mut OutboundReport,
    ) -> SettlementResult<()> {
        match source {
            SettlementSource::Consolidated => self.post_process_batches(ctx, rows, report).await,
            SettlementSource::Individual => self.post_process_requests(ctx, rows, report).await,
        }
    }

    async fn post_process_batches(
        &self,
        ctx: &TaskContext,
        rows: &[Settleable],
        report: &mut OutboundReport,
    ) -> SettlementResult<()> {
        let chunk_size = self.settings.post_process_chunk_size.max(1);
        let page_size = self.settings.post_process_page_size;
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        for chunk in ids.chunks(chunk_size) {
            self.store
                .mark_batches_in_progress(chunk)
                .await
                .map_err(|e| e.context("mark_batches_in_progress", chunk[0]))?;
        }

        let now = self.clock.now();
        for chunk in ids.chunks(chunk_size) {
            let mut after_id = 0;
            loop {
                if ctx.cancel.is_cancelled() {
                    return Err(SettlementError::Cancelled);
                }
                let members = self
                    .store
                    .fetch_batch_members(chunk, after_id, page_size)
                    .await
                    .map_err(|e| e.context("fetch_batch_members", chunk[0]))?;
                let Some(last) = members.last() else {
                    break;
                };
                after_id = last.id;

                for member in &members {
                    let event = PaymentEvent::new(member, PaymentEventType::SentToBank, now);
                    match publish_json(self.bus.as_ref(), &self.topics.payment_event, &event).await
                    {
                        Ok(()) => report.events_published += 1,
                        Err(e) => {
                            error!(request_id = member.id, error = %e, "SentToBank publish failed");
                            report.publish_failures += 1;
                        }
                    }
                }

                if (members.len() as i64) < page_size {
                    break;
                }
            }
        }
        Ok(())
    }

    async fn post_process_requests(
        &self,
        ctx: &TaskContext,
        rows: &[Settleable],
        report: &mut OutboundReport,
    ) -> SettlementResult<()> {
        let now = self.clock.now();
        for chunk in rows.chunks(self.settings.post_process_chunk_size.max(1)) {
            if ctx.cancel.is_cancelled() {
                return Err(SettlementError::Cancelled);
            }
            for row in chunk {
                let Some(request) = row.request.as_ref() else {
                    continue;
                };
                let event = PaymentEvent::new(request, PaymentEventType::SentToBank, now);
                let bus = self.bus.as_ref();
                let topic = self.topics.payment_event.as_str();
                let publish = async move { publish_json(bus, topic, &event).await }.boxed();

                // A failed publish rolls the row back to its pre-attempt status
                match self
                    .store
                    .transition_request_then(row.id, row.status, PaymentStatus::InProgress, publish)
                    .await
                {
                    Ok(true) => report.events_published += 1,
                    Ok(false) => {
                        warn!(request_id = row.id, "Request changed status during settlement, skipped");
                    }
                    Err(e) => {
                        error!(request_id = row.id, error = %e, "SentToBank failed, request reset");
                        report.publish_failures += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
