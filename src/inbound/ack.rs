//! Acknowledgment record processor
//!
//! Business processing for `ach_ack` records: every line must decode, and an entry line
//! must carry a settlement identifier the store knows. The verdict goes back as
//! [`RecordFeedback`]. Store or bus failures are returned so the message is redelivered.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapters::{MessageBus, MessageHandler, publish_json};
use crate::error::SettlementResult;
use crate::events::{RecordFeedback, RecordProcessing};
use crate::nacha::{self, Record, SettlementKind};
use crate::store::PaymentStore;

pub struct AckRecordProcessor {
    store: Arc<dyn PaymentStore>,
    bus: Arc<dyn MessageBus>,
    feedback_topic: String,
}

impl AckRecordProcessor {
    pub fn new(store: Arc<dyn PaymentStore>, bus: Arc<dyn MessageBus>, feedback_topic: String) -> Self {
        Self {
            store,
            bus,
            feedback_topic,
        }
    }

    /// `Ok(true)` when the line acknowledges something this service sent.
    pub async fn verify(&self, line: &str) -> SettlementResult<bool> {
        let entry = match nacha::decode_line(line) {
            Ok(Record::Entry(entry)) => entry,
            Ok(_) => return Ok(true),
            Err(e) => {
                warn!(error = %e, "Undecodable acknowledgment line");
                return Ok(false);
            }
        };

        let settlement_id = entry.individual_id.trim();
        let known = match SettlementKind::of_identifier(settlement_id) {
            Some(SettlementKind::Consolidated) => self
                .store
                .find_batch_by_settlement_id(settlement_id)
                .await?
                .is_some(),
            Some(SettlementKind::Individual) => self
                .store
                .find_request_by_settlement_id(settlement_id)
                .await?
                .is_some(),
            None => false,
        };
        if !known {
            warn!(settlement_id, "Acknowledged settlement identifier not found");
        }
        Ok(known)
    }
}

#[async_trait]
impl MessageHandler for AckRecordProcessor {
    async fn handle(&self, payload: &[u8]) -> SettlementResult<()> {
        let record: RecordProcessing = serde_json::from_slice(payload)?;
        let valid = self.verify(&record.line).await?;
        debug!(record_id = %record.record_id, valid, "Acknowledgment record processed");

        let feedback = RecordFeedback::for_record(&record, !valid);
        publish_json(self.bus.as_ref(), &self.feedback_topic, &feedback).await
    }
}
