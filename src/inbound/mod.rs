//! Inbound Reconciliation Pipeline
//!
//! ```text
//! poll folder ──► [lock inbound_file_processing] read + md5
//!                   │ unseen  → claim file  ─┐
//!                   │ retry   → reclaim file ─┤ per line: claim record + publish RecordProcessing
//!                   │ complete→ archive only  │          (one transaction)
//!                   └ other   → skip          ▼
//!                               AckRecordProcessor ──► RecordFeedback
//!                                                         │
//!                               FeedbackConsumer ◄────────┘
//!                                 error   → record errored, file incomplete
//!                                 success → record complete; all done →
//!                                           file complete + FileProcessingCompleted + archive
//! ```
//!
//! Completion accounting is driven only by feedback, so redelivered or reordered feedback
//! is safe: record rows only move forward.

pub mod ack;
pub mod feedback;
pub mod poller;

pub use ack::AckRecordProcessor;
pub use feedback::FeedbackConsumer;
pub use poller::{FileOutcome, InboundPoller, PollReport};

use chrono::NaiveDate;
use futures::FutureExt;
use tracing::info;

use crate::adapters::{BlobStore, MessageBus, publish_json};
use crate::error::SettlementResult;
use crate::events::FileProcessingCompleted;
use crate::store::DedupStore;
use crate::types::{FileDeduplication, FileStatus};

/// Dated archive destination: `{archive}/{YYYY-MM-DD}/{file name}`.
pub fn archive_path(archive_folder: &str, date: NaiveDate, file_path: &str) -> String {
    let file_name = file_path.rsplit('/').next().unwrap_or(file_path);
    format!(
        "{}/{}/{}",
        archive_folder.trim_end_matches('/'),
        date.format("%Y-%m-%d"),
        file_name
    )
}

/// Collaborators needed to close out a file
pub(crate) struct Finalizer<'a> {
    pub store: &'a dyn DedupStore,
    pub bus: &'a dyn MessageBus,
    pub blobs: &'a dyn BlobStore,
    pub topic: &'a str,
}

impl Finalizer<'_> {
    /// Complete `file` once every record is complete: status, completion event and archive
    /// move commit together. Returns whether this call completed it.
    pub async fn finalize_if_complete(
        &self,
        file: &FileDeduplication,
        archive_folder: &str,
        today: NaiveDate,
    ) -> SettlementResult<bool> {
        if file.status == FileStatus::Complete {
            return Ok(false);
        }
        let completed = self
            .store
            .count_completed_records(file.file_id)
            .await
            .map_err(|e| e.context("count_completed_records", file.file_id))?;
        if completed < i64::from(file.total_record_count) {
            return Ok(false);
        }

        let event = FileProcessingCompleted {
            business_file_type: file.business_file_type.clone(),
        };
        let destination = archive_path(archive_folder, today, &file.file_path);
        let (bus, blobs, topic) = (self.bus, self.blobs, self.topic);
        let src = file.file_path.as_str();
        let dst = destination.as_str();
        let publish = async move {
            publish_json(bus, topic, &event).await?;
            blobs.move_file(src, dst).await
        }
        .boxed();

        let done = self
            .store
            .complete_file_then(file.file_id, publish)
            .await
            .map_err(|e| e.context("complete_file", file.file_id))?;
        if done {
            info!(file_id = %file.file_id, archived = %destination, "File complete");
        }
        Ok(done)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_path_is_dated() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 11).unwrap();
        assert_eq!(
            archive_path("/archive/ack/", date, "/in/ack/ACK_0611.txt"),
            "/archive/ack/2024-06-11/ACK_0611.txt"
        );
        assert_eq!(archive_path("a", date, "plain.txt"), "a/2024-06-11/plain.txt");
    }
}
