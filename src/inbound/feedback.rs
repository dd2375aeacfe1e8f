//! Record feedback consumer

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Finalizer;
use crate::adapters::{BlobStore, Clock, MessageBus, MessageHandler};
use crate::error::{SettlementError, SettlementResult};
use crate::events::RecordFeedback;
use crate::store::DedupStore;

pub struct FeedbackConsumer {
    store: Arc<dyn DedupStore>,
    bus: Arc<dyn MessageBus>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    completed_topic: String,
}

impl FeedbackConsumer {
    pub fn new(
        store: Arc<dyn DedupStore>,
        bus: Arc<dyn MessageBus>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        completed_topic: String,
    ) -> Self {
        Self {
            store,
            bus,
            blobs,
            clock,
            completed_topic,
        }
    }

    /// Apply one record outcome. Returns whether it completed the file.
    pub async fn apply(&self, feedback: &RecordFeedback) -> SettlementResult<bool> {
        if feedback.is_error {
            let moved = self
                .store
                .record_failed(feedback.file_id, feedback.record_id)
                .await
                .map_err(|e| e.context("record_failed", feedback.record_id))?;
            if moved {
                warn!(
                    file_id = %feedback.file_id,
                    record_id = %feedback.record_id,
                    "Record failed, file incomplete"
                );
            }
            return Ok(false);
        }

        let moved = self
            .store
            .record_completed(feedback.file_id, feedback.record_id)
            .await
            .map_err(|e| e.context("record_completed", feedback.record_id))?;
        if !moved {
            debug!(record_id = %feedback.record_id, "Record already complete");
        }

        let file = self
            .store
            .get_file(feedback.file_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("file {}", feedback.file_id)))?;

        Finalizer {
            store: self.store.as_ref(),
            bus: self.bus.as_ref(),
            blobs: self.blobs.as_ref(),
            topic: &self.completed_topic,
        }
        .finalize_if_complete(&file, &feedback.archive_folder_location, self.clock.today())
        .await
    }
}

#[async_trait]
impl MessageHandler for FeedbackConsumer {
    async fn handle(&self, payload: &[u8]) -> SettlementResult<()> {
        let feedback: RecordFeedback = serde_json::from_slice(payload)?;
        self.apply(&feedback).await.map(|_| ())
    }
}
