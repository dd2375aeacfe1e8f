//! PostgreSQL payment store
//!
//! Every status change is a CAS (`WHERE status = ...`). Amount folding re-reads the open
//! batch under `FOR UPDATE` in the same transaction that writes the new amount. Assigning a
//! batch its settlement id closes it: the claim and the fold lookup contend for the same row
//! lock and the fold skips any row holding an id.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::{BatchClaim, FoldOutcome, PaymentStore, Publish, ensure_transition};
use crate::error::{SettlementError, SettlementResult};
use crate::types::{
    ConsolidatedRequest, ConsolidationGroup, ExecutionRequest, Frequency, PayeeDetails,
    PaymentMethodType, PaymentStatus, RequestType,
};

const REQUEST_COLUMNS: &str = "id, tenant_id, payment_id, consolidated_request_id, \
    account_identifier, routing_number, amount, payment_date, frequency, transaction_type, \
    request_type, method_type, extended_data, status, settlement_identifier";

const BATCH_COLUMNS: &str = "id, account_identifier, routing_number, amount, payment_date, \
    request_type, extended_data, retry_count, status, settlement_identifier, \
    last4_account_identifier";

fn open_status_ids() -> Vec<i16> {
    vec![PaymentStatus::New.id(), PaymentStatus::Accepted.id()]
}

fn frequency_id(frequency: Option<Frequency>) -> Option<i16> {
    frequency.map(|f| f.id())
}

fn type_ids(types: &[RequestType]) -> Vec<i16> {
    types.iter().map(|t| t.id()).collect()
}

fn coded<T>(row: &PgRow, column: &str) -> SettlementResult<T>
where
    T: TryFrom<i16, Error = String>,
{
    let id: i16 = row.try_get(column)?;
    T::try_from(id).map_err(SettlementError::InvalidState)
}

fn row_to_request(row: &PgRow) -> SettlementResult<ExecutionRequest> {
    let extended: Json<PayeeDetails> = row.try_get("extended_data")?;
    Ok(ExecutionRequest {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        payment_id: row.try_get("payment_id")?,
        consolidated_request_id: row.try_get("consolidated_request_id")?,
        account_identifier: row.try_get("account_identifier")?,
        routing_number: row.try_get("routing_number")?,
        amount: row.try_get("amount")?,
        payment_date: row.try_get("payment_date")?,
        frequency: coded(row, "frequency")?,
        transaction_type: coded(row, "transaction_type")?,
        request_type: coded(row, "request_type")?,
        method_type: coded(row, "method_type")?,
        extended_data: extended.0,
        status: coded(row, "status")?,
        settlement_identifier: row.try_get("settlement_identifier")?,
    })
}

fn row_to_batch(row: &PgRow) -> SettlementResult<ConsolidatedRequest> {
    let extended: Json<PayeeDetails> = row.try_get("extended_data")?;
    Ok(ConsolidatedRequest {
        id: row.try_get("id")?,
        account_identifier: row.try_get("account_identifier")?,
        routing_number: row.try_get("routing_number")?,
        amount: row.try_get("amount")?,
        payment_date: row.try_get("payment_date")?,
        request_type: coded(row, "request_type")?,
        extended_data: extended.0,
        retry_count: row.try_get("retry_count")?,
        status: coded(row, "status")?,
        settlement_identifier: row.try_get("settlement_identifier")?,
        last4_account_identifier: row.try_get("last4_account_identifier")?,
    })
}

fn rows_to_requests(rows: Vec<PgRow>) -> SettlementResult<Vec<ExecutionRequest>> {
    rows.iter().map(row_to_request).collect()
}

fn rows_to_batches(rows: Vec<PgRow>) -> SettlementResult<Vec<ConsolidatedRequest>> {
    rows.iter().map(row_to_batch).collect()
}

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn assign_settlement_id(
        &self,
        table: &'static str,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<String> {
        let sql = format!(
            "UPDATE {} SET settlement_identifier = COALESCE(settlement_identifier, $2), \
             updated_at = NOW() WHERE id = $1 RETURNING settlement_identifier",
            table
        );
        let effective: Option<String> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(settlement_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SettlementError::from(e).context("assign_settlement_id", id))?;
        effective.ok_or_else(|| SettlementError::NotFound(format!("{} row {}", table, id)))
    }

    async fn transition_then(
        &self,
        table: &'static str,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        ensure_transition(from, to)?;
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "UPDATE {} SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
            table
        );
        let result = sqlx::query(&sql)
            .bind(to.id())
            .bind(id)
            .bind(from.id())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // Dropping `tx` on a failed publish rolls the status back.
        publish.await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_execution_request(&self, request: &ExecutionRequest) -> SettlementResult<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO execution_requests_tb
                (tenant_id, payment_id, consolidated_request_id, account_identifier,
                 routing_number, amount, payment_date, frequency, transaction_type,
                 request_type, method_type, extended_data, status, settlement_identifier)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(request.tenant_id)
        .bind(&request.payment_id)
        .bind(request.consolidated_request_id)
        .bind(&request.account_identifier)
        .bind(&request.routing_number)
        .bind(request.amount)
        .bind(request.payment_date)
        .bind(request.frequency.id())
        .bind(request.transaction_type.id())
        .bind(request.request_type.id())
        .bind(request.method_type.id())
        .bind(Json(&request.extended_data))
        .bind(request.status.id())
        .bind(&request.settlement_identifier)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(id) => Ok(id),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::info!(payment_id = %request.payment_id, "Duplicate payment id rejected");
                Err(SettlementError::Duplicate(request.payment_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_execution_request(&self, id: i64) -> SettlementResult<Option<ExecutionRequest>> {
        let sql = format!("SELECT {} FROM execution_requests_tb WHERE id = $1", REQUEST_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn get_batch(&self, id: i64) -> SettlementResult<Option<ConsolidatedRequest>> {
        let sql = format!("SELECT {} FROM consolidated_requests_tb WHERE id = $1", BATCH_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_batch).transpose()
    }

    async fn fetch_consolidation_candidates(
        &self,
        request_type: RequestType,
        frequency: Option<Frequency>,
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        let sql = format!(
            r#"
            SELECT {} FROM execution_requests_tb
            WHERE request_type = $1
              AND payment_date <= $2
              AND (status = $3 OR (status = $4 AND consolidated_request_id IS NULL))
              AND ($6::SMALLINT IS NULL OR frequency = $6)
            ORDER BY id
            LIMIT $5
            "#,
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(request_type.id())
            .bind(up_to)
            .bind(PaymentStatus::New.id())
            .bind(PaymentStatus::Consolidated.id())
            .bind(limit)
            .bind(frequency_id(frequency))
            .fetch_all(&self.pool)
            .await?;
        rows_to_requests(rows)
    }

    async fn mark_consolidated(&self, ids: &[i64]) -> SettlementResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE execution_requests_tb
            SET status = $1, updated_at = NOW()
            WHERE id = ANY($2)
              AND (status = $3 OR (status = $1 AND consolidated_request_id IS NULL))
            "#,
        )
        .bind(PaymentStatus::Consolidated.id())
        .bind(ids)
        .bind(PaymentStatus::New.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fold_into_batch(&self, group: &ConsolidationGroup) -> SettlementResult<FoldOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM consolidated_requests_tb
            WHERE account_identifier = $1
              AND routing_number = $2
              AND request_type = $3
              AND payment_date = $4
              AND status = ANY($5)
              AND settlement_identifier IS NULL
            ORDER BY id
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(&group.key.account_identifier)
        .bind(&group.key.routing_number)
        .bind(group.key.request_type.id())
        .bind(group.payment_date)
        .bind(open_status_ids())
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(batch_id) => {
                sqlx::query(
                    "UPDATE consolidated_requests_tb SET amount = amount + $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(batch_id)
                .bind(group.amount)
                .execute(&mut *tx)
                .await?;
                FoldOutcome {
                    batch_id,
                    created: false,
                }
            }
            None => {
                let batch_id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO consolidated_requests_tb
                        (account_identifier, routing_number, amount, payment_date, request_type,
                         extended_data, retry_count, status, last4_account_identifier)
                    VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8)
                    RETURNING id
                    "#,
                )
                .bind(&group.key.account_identifier)
                .bind(&group.key.routing_number)
                .bind(group.amount)
                .bind(group.payment_date)
                .bind(group.key.request_type.id())
                .bind(Json(&group.extended_data))
                .bind(PaymentStatus::New.id())
                .bind(&group.last4_account_identifier)
                .fetch_one(&mut *tx)
                .await?;
                FoldOutcome {
                    batch_id,
                    created: true,
                }
            }
        };

        sqlx::query(
            "UPDATE execution_requests_tb SET consolidated_request_id = $1, updated_at = NOW() WHERE id = ANY($2)",
        )
        .bind(outcome.batch_id)
        .bind(&group.member_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch_open_batches(
        &self,
        request_types: &[RequestType],
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ConsolidatedRequest>> {
        let sql = format!(
            r#"
            SELECT {} FROM consolidated_requests_tb
            WHERE request_type = ANY($1) AND status = ANY($2) AND payment_date <= $3
            ORDER BY id
            LIMIT $4
            "#,
            BATCH_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(type_ids(request_types))
            .bind(open_status_ids())
            .bind(up_to)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows_to_batches(rows)
    }

    async fn fetch_individual_requests(
        &self,
        request_types: &[RequestType],
        method: PaymentMethodType,
        frequency: Option<Frequency>,
        up_to: NaiveDate,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        let sql = format!(
            r#"
            SELECT {} FROM execution_requests_tb
            WHERE request_type = ANY($1)
              AND method_type = $2
              AND status = ANY($3)
              AND payment_date <= $4
              AND ($6::SMALLINT IS NULL OR frequency = $6)
            ORDER BY id
            LIMIT $5
            "#,
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(type_ids(request_types))
            .bind(method.id())
            .bind(open_status_ids())
            .bind(up_to)
            .bind(limit)
            .bind(frequency_id(frequency))
            .fetch_all(&self.pool)
            .await?;
        rows_to_requests(rows)
    }

    async fn assign_batch_settlement_id(
        &self,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<BatchClaim> {
        let mut tx = self.pool.begin().await?;
        // Waits out any fold holding the row; the amount read here is final.
        let current: Option<(Option<String>, Decimal)> = sqlx::query_as(
            "SELECT settlement_identifier, amount FROM consolidated_requests_tb WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| SettlementError::from(e).context("assign_batch_settlement_id", id))?;
        let Some((existing, amount)) = current else {
            return Err(SettlementError::NotFound(format!("consolidated_requests_tb row {}", id)));
        };

        let settlement_identifier = match existing {
            Some(existing) => existing,
            None => {
                sqlx::query(
                    "UPDATE consolidated_requests_tb SET settlement_identifier = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(settlement_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| SettlementError::from(e).context("assign_batch_settlement_id", id))?;
                settlement_id.to_string()
            }
        };
        tx.commit().await?;

        Ok(BatchClaim {
            settlement_identifier,
            amount,
        })
    }

    async fn assign_request_settlement_id(
        &self,
        id: i64,
        settlement_id: &str,
    ) -> SettlementResult<String> {
        self.assign_settlement_id("execution_requests_tb", id, settlement_id)
            .await
    }

    async fn increment_batch_retry(&self, ids: &[i64]) -> SettlementResult<u64> {
        let result = sqlx::query(
            "UPDATE consolidated_requests_tb SET retry_count = retry_count + 1, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_batch_errored(&self, id: i64) -> SettlementResult<bool> {
        let result = sqlx::query(
            "UPDATE consolidated_requests_tb SET status = $1, updated_at = NOW() WHERE id = $2 AND status = ANY($3)",
        )
        .bind(PaymentStatus::Errored.id())
        .bind(id)
        .bind(open_status_ids())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_batches_in_progress(&self, ids: &[i64]) -> SettlementResult<u64> {
        let result = sqlx::query(
            "UPDATE consolidated_requests_tb SET status = $1, updated_at = NOW() WHERE id = ANY($2) AND status = ANY($3)",
        )
        .bind(PaymentStatus::InProgress.id())
        .bind(ids)
        .bind(open_status_ids())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_batch_members(
        &self,
        batch_ids: &[i64],
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        let sql = format!(
            r#"
            SELECT {} FROM execution_requests_tb
            WHERE consolidated_request_id = ANY($1) AND id > $2
            ORDER BY id
            LIMIT $3
            "#,
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(batch_ids)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows_to_requests(rows)
    }

    async fn fetch_requests_by_status(
        &self,
        status: PaymentStatus,
        due_by: NaiveDate,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        let sql = format!(
            r#"
            SELECT {} FROM execution_requests_tb
            WHERE status = $1 AND payment_date <= $2 AND id > $3
            ORDER BY id
            LIMIT $4
            "#,
            REQUEST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.id())
            .bind(due_by)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows_to_requests(rows)
    }

    async fn fetch_batches_by_status(
        &self,
        status: PaymentStatus,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ConsolidatedRequest>> {
        let sql = format!(
            "SELECT {} FROM consolidated_requests_tb WHERE status = $1 AND id > $2 ORDER BY id LIMIT $3",
            BATCH_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status.id())
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows_to_batches(rows)
    }

    async fn fetch_settled_members(
        &self,
        after_id: i64,
        limit: i64,
    ) -> SettlementResult<Vec<ExecutionRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT e.* FROM execution_requests_tb e
            JOIN consolidated_requests_tb c ON c.id = e.consolidated_request_id
            WHERE e.status = $1 AND c.status = $2 AND e.id > $3
            ORDER BY e.id
            LIMIT $4
            "#,
        )
        .bind(PaymentStatus::Consolidated.id())
        .bind(PaymentStatus::Completed.id())
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows_to_requests(rows)
    }

    async fn transition_request_then(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        self.transition_then("execution_requests_tb", id, from, to, publish)
            .await
    }

    async fn transition_batch_then(
        &self,
        id: i64,
        from: PaymentStatus,
        to: PaymentStatus,
        publish: Publish<'_>,
    ) -> SettlementResult<bool> {
        self.transition_then("consolidated_requests_tb", id, from, to, publish)
            .await
    }

    async fn find_batch_by_settlement_id(
        &self,
        settlement_id: &str,
    ) -> SettlementResult<Option<ConsolidatedRequest>> {
        let sql = format!(
            "SELECT {} FROM consolidated_requests_tb WHERE settlement_identifier = $1",
            BATCH_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(settlement_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_batch).transpose()
    }

    async fn find_request_by_settlement_id(
        &self,
        settlement_id: &str,
    ) -> SettlementResult<Option<ExecutionRequest>> {
        let sql = format!(
            "SELECT {} FROM execution_requests_tb WHERE settlement_identifier = $1 LIMIT 1",
            REQUEST_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(settlement_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_request).transpose()
    }
}
