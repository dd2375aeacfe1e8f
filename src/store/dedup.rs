//! PostgreSQL inbound dedup store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{DedupStore, Publish};
use crate::error::{SettlementError, SettlementResult};
use crate::types::{FileDeduplication, FileStatus, RecordDeduplication, RecordStatus};

const FILE_COLUMNS: &str = "file_id, file_hash, file_path, business_file_type, status, \
    total_record_count, created_at, updated_at";

fn row_to_file(row: &PgRow) -> SettlementResult<FileDeduplication> {
    let status: String = row.try_get("status")?;
    Ok(FileDeduplication {
        file_id: row.try_get("file_id")?,
        file_hash: row.try_get("file_hash")?,
        file_path: row.try_get("file_path")?,
        business_file_type: row.try_get("business_file_type")?,
        status: FileStatus::parse(&status).ok_or_else(|| {
            SettlementError::InvalidState(format!("unknown file status: {}", status))
        })?,
        total_record_count: row.try_get("total_record_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_record(row: &PgRow) -> SettlementResult<RecordDeduplication> {
    let status: String = row.try_get("status")?;
    Ok(RecordDeduplication {
        file_id: row.try_get("file_id")?,
        record_id: row.try_get("record_id")?,
        record_hash: row.try_get("record_hash")?,
        status: RecordStatus::parse(&status).ok_or_else(|| {
            SettlementError::InvalidState(format!("unknown record status: {}", status))
        })?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct PgDedupStore {
    pool: PgPool,
}

impl PgDedupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupStore for PgDedupStore {
    async fn find_file(
        &self,
        file_hash: &str,
        since: DateTime<Utc>,
    ) -> SettlementResult<Option<FileDeduplication>> {
        let sql = format!(
            r#"
            SELECT {} FROM file_deduplication_tb
            WHERE file_hash = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            FILE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(file_hash)
            .bind(since)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_file).transpose()
    }

    async fn get_file(&self, file_id: Uuid) -> SettlementResult<Option<FileDeduplication>> {
        let sql = format!(
            "SELECT {} FROM file_deduplication_tb WHERE file_id = $1",
            FILE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_file).transpose()
    }

    async fn claim_file(&self, file: &FileDeduplication) -> SettlementResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_deduplication_tb
                (file_id, file_hash, file_path, business_file_type, status, total_record_count,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(file.file_id)
        .bind(&file.file_hash)
        .bind(&file.file_path)
        .bind(&file.business_file_type)
        .bind(FileStatus::InProgress.as_str())
        .bind(file.total_record_count)
        .bind(file.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| SettlementError::from(e).context("claim_file", file.file_id))?;
        Ok(())
    }

    async fn reclaim_file(&self, file_id: Uuid, total_record_count: i32) -> SettlementResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE file_deduplication_tb
            SET status = $1, total_record_count = $2, updated_at = NOW()
            WHERE file_id = $3 AND status = $4
            "#,
        )
        .bind(FileStatus::InProgress.as_str())
        .bind(total_record_count)
        .bind(file_id)
        .bind(FileStatus::Retry.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_file_retry(&self, file_id: Uuid) -> SettlementResult<bool> {
        let result = sqlx::query(
            "UPDATE file_deduplication_tb SET status = $1, updated_at = NOW() WHERE file_id = $2 AND status <> $3",
        )
        .bind(FileStatus::Retry.as_str())
        .bind(file_id)
        .bind(FileStatus::Complete.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_record(
        &self,
        file_id: Uuid,
        record_hash: &str,
    ) -> SettlementResult<Option<RecordDeduplication>> {
        let row = sqlx::query(
            r#"
            SELECT file_id, record_id, record_hash, status, updated_at
            FROM record_deduplication_tb
            WHERE file_id = $1 AND record_hash = $2
            "#,
        )
        .bind(file_id)
        .bind(record_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn claim_record_then(
        &self,
        record: &RecordDeduplication,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO record_deduplication_tb (record_id, file_id, record_hash, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (file_id, record_hash) DO NOTHING
            "#,
        )
        .bind(record.record_id)
        .bind(record.file_id)
        .bind(&record.record_hash)
        .bind(RecordStatus::InProgress.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        publish.await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn reclaim_record_then(
        &self,
        file_id: Uuid,
        record_id: Uuid,
        stale_before: DateTime<Utc>,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE record_deduplication_tb
            SET status = $1, updated_at = NOW()
            WHERE file_id = $2 AND record_id = $3
              AND (status = $4 OR (status = $1 AND updated_at < $5))
            "#,
        )
        .bind(RecordStatus::InProgress.as_str())
        .bind(file_id)
        .bind(record_id)
        .bind(RecordStatus::Errored.as_str())
        .bind(stale_before)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        publish.await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_failed(&self, file_id: Uuid, record_id: Uuid) -> SettlementResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE record_deduplication_tb SET status = $1, updated_at = NOW()
            WHERE file_id = $2 AND record_id = $3 AND status <> $4
            "#,
        )
        .bind(RecordStatus::Errored.as_str())
        .bind(file_id)
        .bind(record_id)
        .bind(RecordStatus::Complete.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE file_deduplication_tb SET status = $1, updated_at = NOW() WHERE file_id = $2 AND status <> $3",
        )
        .bind(FileStatus::Incomplete.as_str())
        .bind(file_id)
        .bind(FileStatus::Complete.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn record_completed(&self, file_id: Uuid, record_id: Uuid) -> SettlementResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE record_deduplication_tb SET status = $1, updated_at = NOW()
            WHERE file_id = $2 AND record_id = $3 AND status <> $1
            "#,
        )
        .bind(RecordStatus::Complete.as_str())
        .bind(file_id)
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_completed_records(&self, file_id: Uuid) -> SettlementResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM record_deduplication_tb WHERE file_id = $1 AND status = $2",
        )
        .bind(file_id)
        .bind(RecordStatus::Complete.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn complete_file_then(
        &self,
        file_id: Uuid,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE file_deduplication_tb SET status = $1, updated_at = NOW() WHERE file_id = $2 AND status <> $1",
        )
        .bind(FileStatus::Complete.as_str())
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        publish.await?;
        tx.commit().await?;
        Ok(true)
    }
}
