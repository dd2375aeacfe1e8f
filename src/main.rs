//! ACH Settlement service
//!
//! ```text
//! ach_settlement --env dev --settle-once        one settlement run for today, then exit
//! ach_settlement --env dev --worker             scheduler + inbound poller + consumers
//! ach_settlement --env dev --retry-file <uuid>  send an inbound file back through processing
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;

use ach_settlement::adapters::{
    AccountCipher, BlobStore, Clock, LocalBlobStore, MessageBus, MessageConsumer, OutboxBus,
    PlaintextCipher, SystemClock,
};
use ach_settlement::db::Database;
use ach_settlement::lock::PgAdvisoryLock;
use ach_settlement::store::{DedupStore, PaymentStore, PgDedupStore, PgPaymentStore};
use ach_settlement::{
    AckRecordProcessor, AppConfig, CompletionReconciler, ConsolidationEngine, FeedbackConsumer,
    InboundPoller, LockCoordinator, OutboundSettlementPipeline, SettlementRunner,
    SettlementWorker,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_arg(name: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1).cloned())
}

fn has_flag(name: &str) -> bool {
    std::env::args().any(|a| a == name)
}

fn build_worker(config: &AppConfig, db: &Database) -> SettlementWorker {
    let pool = db.pool().clone();
    let payments: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(pool.clone()));
    let dedup: Arc<dyn DedupStore> = Arc::new(PgDedupStore::new(pool.clone()));
    let outbox = Arc::new(OutboxBus::new(pool.clone()));
    let bus: Arc<dyn MessageBus> = outbox.clone();
    let consumer: Arc<dyn MessageConsumer> = outbox;
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new());
    let cipher: Arc<dyn AccountCipher> = Arc::new(PlaintextCipher);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let locks = Arc::new(LockCoordinator::new(
        Arc::new(PgAdvisoryLock::new(pool)),
        Duration::from_millis(config.settlement.lock_retry_interval_ms),
    ));
    let settings = &config.settlement;

    let runner = SettlementRunner::new(
        locks.clone(),
        ConsolidationEngine::new(
            payments.clone(),
            cipher.clone(),
            settings.consolidated_request_types.clone(),
            settings.fetch_batch_size,
        ),
        OutboundSettlementPipeline::new(
            payments.clone(),
            bus.clone(),
            blobs.clone(),
            cipher.clone(),
            clock.clone(),
            settings.clone(),
            config.nacha.clone(),
            config.topics.clone(),
        ),
    );
    let poller = InboundPoller::new(
        dedup.clone(),
        bus.clone(),
        blobs.clone(),
        clock.clone(),
        locks,
        config.inbound.clone(),
        config.topics.clone(),
    );
    let ack = AckRecordProcessor::new(
        payments.clone(),
        bus.clone(),
        config.topics.record_feedback.clone(),
    );
    let feedback = FeedbackConsumer::new(
        dedup,
        bus.clone(),
        blobs,
        clock.clone(),
        config.topics.file_processing_completed.clone(),
    );
    let reconciler = CompletionReconciler::new(
        payments,
        bus,
        cipher,
        clock.clone(),
        config.topics.clone(),
        config.inbound.completion_business_file_type.clone(),
        settings.post_process_page_size,
    );

    SettlementWorker::new(
        Arc::new(runner),
        Arc::new(poller),
        consumer,
        Arc::new(ack),
        Arc::new(feedback),
        Arc::new(reconciler),
        clock,
        config.topics.clone(),
        Duration::from_secs(settings.schedule_interval_secs),
        Duration::from_secs(config.inbound.poll_interval_secs),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).context("loading configuration")?;
    let _log_guard = ach_settlement::logging::init_logging(&config)?;

    tracing::info!("Starting ACH settlement in {} mode", env);

    let url = config
        .postgres_url
        .clone()
        .context("postgres_url is required")?;
    let db = Database::connect(&url, config.max_connections).await?;
    db.migrate().await?;

    let cancel = CancellationToken::new();
    let worker = build_worker(&config, &db);

    if let Some(file_id) = get_arg("--retry-file") {
        let file_id = uuid::Uuid::parse_str(&file_id).context("--retry-file expects a uuid")?;
        if !worker.retry_file(file_id).await? {
            bail!("file {} not found or already complete", file_id);
        }
        println!("File {} will be reprocessed on the next poll", file_id);
        return Ok(());
    }

    if has_flag("--settle-once") {
        let response = worker.settle_today(&cancel).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        if let Some(error) = response.error {
            bail!("settlement failed: {}", error.message);
        }
        return Ok(());
    }

    if has_flag("--worker") {
        let shutdown = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
        });
        worker.run(cancel).await;
        return Ok(());
    }

    bail!("nothing to do: pass --settle-once, --worker or --retry-file <uuid>")
}
