//! Inbound file poller
//!
//! Each file is handled under the "inbound file processing" lock. The dedup decision is
//! taken on the content hash within the retention window, never on the path.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Finalizer, archive_path};
use crate::adapters::{BlobStore, Clock, MessageBus, publish_json};
use crate::config::{InboundConfig, InboundFolder, TopicConfig};
use crate::error::{SettlementError, SettlementResult};
use crate::events::RecordProcessing;
use crate::lock::{LockCoordinator, LockResource};
use crate::store::DedupStore;
use crate::types::{
    FileDeduplication, FileStatus, RecordDeduplication, RecordStatus, content_hash,
};

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// New content, records fanned out
    Claimed { file_id: Uuid, published: usize },
    /// Same content in `retry`, unfinished records fanned out again
    Reclaimed { file_id: Uuid, published: usize },
    /// Already complete, only moved to the archive
    Archived { file_id: Uuid },
    /// Seen and still being worked on
    Skipped { file_id: Uuid, status: FileStatus },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub outcomes: Vec<FileOutcome>,
    pub failed: usize,
}

/// Distinct non-blank lines with their hashes, in file order
fn distinct_lines(bytes: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(bytes);
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            continue;
        }
        let hash = content_hash(line.as_bytes());
        if seen.insert(hash.clone()) {
            lines.push((line.to_string(), hash));
        }
    }
    lines
}

pub struct InboundPoller {
    store: Arc<dyn DedupStore>,
    bus: Arc<dyn MessageBus>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<LockCoordinator>,
    config: InboundConfig,
    topics: TopicConfig,
}

impl InboundPoller {
    pub fn new(
        store: Arc<dyn DedupStore>,
        bus: Arc<dyn MessageBus>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        locks: Arc<LockCoordinator>,
        config: InboundConfig,
        topics: TopicConfig,
    ) -> Self {
        Self {
            store,
            bus,
            blobs,
            clock,
            locks,
            config,
            topics,
        }
    }

    /// One pass over every configured folder.
    pub async fn poll_all(&self, cancel: &CancellationToken) -> SettlementResult<PollReport> {
        let mut report = PollReport::default();
        for folder in &self.config.folders {
            let folder_report = self.poll_folder(cancel, folder).await?;
            report.outcomes.extend(folder_report.outcomes);
            report.failed += folder_report.failed;
        }
        Ok(report)
    }

    /// One pass over `folder`. A failing file is logged and left in place for the next pass.
    pub async fn poll_folder(
        &self,
        cancel: &CancellationToken,
        folder: &InboundFolder,
    ) -> SettlementResult<PollReport> {
        let files = self.blobs.list(&folder.path).await?;
        let mut report = PollReport::default();

        for path in files {
            if cancel.is_cancelled() {
                return Err(SettlementError::Cancelled);
            }
            let outcome = self
                .locks
                .run_with_lock(cancel, LockResource::InboundFileProcessing, || {
                    self.process_file(folder, &path)
                })
                .await;
            match outcome {
                Ok(outcome) => {
                    debug!(path = %path, ?outcome, "Inbound file handled");
                    report.outcomes.push(outcome);
                }
                Err(SettlementError::Cancelled) => return Err(SettlementError::Cancelled),
                Err(e) => {
                    error!(path = %path, error = %e, "Inbound file failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Operator escalation: reprocess unfinished records of `file_id` on the next poll.
    pub async fn mark_for_retry(&self, file_id: Uuid) -> SettlementResult<bool> {
        let marked = self.store.mark_file_retry(file_id).await?;
        if marked {
            info!(file_id = %file_id, "File marked for retry");
        } else {
            warn!(file_id = %file_id, "File not found or already complete");
        }
        Ok(marked)
    }

    async fn process_file(&self, folder: &InboundFolder, path: &str) -> SettlementResult<FileOutcome> {
        let bytes = self.blobs.read(path).await?;
        let file_hash = content_hash(&bytes);
        let now = self.clock.now();
        let since = now - Duration::days(self.config.retention_days);
        let lines = distinct_lines(&bytes);

        let existing = self
            .store
            .find_file(&file_hash, since)
            .await
            .map_err(|e| e.context("find_file", &file_hash))?;

        match existing {
            None => {
                let file = FileDeduplication {
                    file_id: Uuid::new_v4(),
                    file_hash,
                    file_path: path.to_string(),
                    business_file_type: folder.business_file_type.clone(),
                    status: FileStatus::InProgress,
                    total_record_count: lines.len() as i32,
                    created_at: now,
                    updated_at: now,
                };
                self.store.claim_file(&file).await?;
                info!(file_id = %file.file_id, path = %path, records = lines.len(), "File claimed");

                let published = self.fan_out(folder, &file, &lines, None).await?;
                Ok(FileOutcome::Claimed {
                    file_id: file.file_id,
                    published,
                })
            }
            Some(mut file) if file.status == FileStatus::Retry => {
                let total = lines.len() as i32;
                if !self.store.reclaim_file(file.file_id, total).await? {
                    return Ok(FileOutcome::Skipped {
                        file_id: file.file_id,
                        status: file.status,
                    });
                }
                info!(file_id = %file.file_id, path = %path, "File reclaimed for retry");
                file.status = FileStatus::InProgress;
                file.total_record_count = total;
                file.file_path = path.to_string();

                let stale_before = now - Duration::seconds(self.config.record_reclaim_after_secs);
                let published = self
                    .fan_out(folder, &file, &lines, Some(stale_before))
                    .await?;
                Ok(FileOutcome::Reclaimed {
                    file_id: file.file_id,
                    published,
                })
            }
            Some(file) if file.status == FileStatus::Complete => {
                info!(file_id = %file.file_id, path = %path, "Duplicate of complete file, archiving");
                let destination = archive_path(&folder.archive_path, self.clock.today(), path);
                self.blobs.move_file(path, &destination).await?;
                Ok(FileOutcome::Archived {
                    file_id: file.file_id,
                })
            }
            Some(mut file) => {
                // Records may all be complete while the archive step rolled back
                file.file_path = path.to_string();
                let finalizer = Finalizer {
                    store: self.store.as_ref(),
                    bus: self.bus.as_ref(),
                    blobs: self.blobs.as_ref(),
                    topic: &self.topics.file_processing_completed,
                };
                if finalizer
                    .finalize_if_complete(&file, &folder.archive_path, self.clock.today())
                    .await?
                {
                    return Ok(FileOutcome::Archived {
                        file_id: file.file_id,
                    });
                }
                info!(file_id = %file.file_id, status = %file.status, "File already in progress, skipped");
                Ok(FileOutcome::Skipped {
                    file_id: file.file_id,
                    status: file.status,
                })
            }
        }
    }

    /// Claim and publish every line. With `stale_before`, existing unfinished records
    /// are re-published too. A publish failure escalates the file to `retry`.
    async fn fan_out(
        &self,
        folder: &InboundFolder,
        file: &FileDeduplication,
        lines: &[(String, String)],
        stale_before: Option<DateTime<Utc>>,
    ) -> SettlementResult<usize> {
        let mut published = 0usize;
        let mut failed = 0usize;

        for (line, hash) in lines {
            match self.fan_out_line(folder, file, line, hash, stale_before).await {
                Ok(true) => published += 1,
                Ok(false) => debug!(file_id = %file.file_id, record_hash = %hash, "Duplicate record skipped"),
                Err(e) => {
                    error!(file_id = %file.file_id, record_hash = %hash, error = %e, "Record fan-out failed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            self.store.mark_file_retry(file.file_id).await?;
            warn!(file_id = %file.file_id, failed, "Unclaimed records left, file set to retry");
        }
        Ok(published)
    }

    async fn fan_out_line(
        &self,
        folder: &InboundFolder,
        file: &FileDeduplication,
        line: &str,
        hash: &str,
        stale_before: Option<DateTime<Utc>>,
    ) -> SettlementResult<bool> {
        let existing = match stale_before {
            Some(_) => self.store.find_record(file.file_id, hash).await?,
            None => None,
        };
        let record_id = existing
            .as_ref()
            .map(|r| r.record_id)
            .unwrap_or_else(Uuid::new_v4);

        let message = RecordProcessing {
            file_id: file.file_id,
            record_id,
            business_file_type: file.business_file_type.clone(),
            total_record_count: file.total_record_count,
            file_path: file.file_path.clone(),
            archive_folder_location: folder.archive_path.clone(),
            line: line.to_string(),
        };
        let bus = self.bus.as_ref();
        let topic = self.topics.record_processing.as_str();
        let publish = async move { publish_json(bus, topic, &message).await }.boxed();

        match (existing, stale_before) {
            (Some(record), _) if record.status == RecordStatus::Complete => Ok(false),
            (Some(record), Some(stale_before)) => {
                self.store
                    .reclaim_record_then(file.file_id, record.record_id, stale_before, publish)
                    .await
            }
            _ => {
                let record = RecordDeduplication {
                    file_id: file.file_id,
                    record_id,
                    record_hash: hash.to_string(),
                    status: RecordStatus::InProgress,
                    updated_at: self.clock.now(),
                };
                self.store.claim_record_then(&record, publish).await
            }
        }
    }
}
