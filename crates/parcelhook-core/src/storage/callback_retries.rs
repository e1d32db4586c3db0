//! Repository for the `callback_retries` table.
//!
//! Every transition is guarded by `status = 'pending'`, so a record that
//! reached `succeeded` or `exhausted` is never written again, even if two
//! processors race on it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{RetryId, RetryRecord, RetryStatus},
};

const COLUMNS: &str = "id, shipment_id, provider_slug, payload, headers, attempts, \
                       next_retry_at, last_error, status, created_at";

/// Repository for retry record operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new retry record.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, record: &RetryRecord) -> Result<RetryId> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO callback_retries (
                id, shipment_id, provider_slug, payload, headers,
                attempts, next_retry_at, last_error, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            ",
        )
        .bind(record.id)
        .bind(&record.shipment_id)
        .bind(&record.provider_slug)
        .bind(&record.payload)
        .bind(sqlx::types::Json(&record.headers))
        .bind(record.attempts)
        .bind(record.next_retry_at)
        .bind(&record.last_error)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Finds a record by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: RetryId) -> Result<Option<RetryRecord>> {
        let record = sqlx::query_as::<_, RetryRecord>(&format!(
            "SELECT {COLUMNS} FROM callback_retries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }

    /// Returns up to `limit` pending records due at `now`, earliest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryRecord>> {
        let records = sqlx::query_as::<_, RetryRecord>(&format!(
            r"
            SELECT {COLUMNS} FROM callback_retries
            WHERE status = 'pending'
              AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            LIMIT $2
            "
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await?;

        Ok(records)
    }

    /// Claims up to `limit` due records for exclusive processing.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent processors claim disjoint
    /// rows. Claimed rows have `next_retry_at` pushed to `lease_until` in the
    /// same transaction; a processor that dies mid-batch therefore releases
    /// its claims when the lease elapses. Returned records carry their
    /// original deadlines.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<RetryRecord>> {
        let mut tx = self.pool.begin().await?;

        let records = sqlx::query_as::<_, RetryRecord>(&format!(
            r"
            SELECT {COLUMNS} FROM callback_retries
            WHERE status = 'pending'
              AND next_retry_at <= $1
            ORDER BY next_retry_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *tx)
        .await?;

        if records.is_empty() {
            tx.rollback().await?;
            return Ok(records);
        }

        let ids: Vec<Uuid> = records.iter().map(|r| r.id.0).collect();
        sqlx::query("UPDATE callback_retries SET next_retry_at = $1 WHERE id = ANY($2)")
            .bind(lease_until)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(records)
    }

    /// Moves a pending record to `succeeded`.
    ///
    /// Returns false if the record is missing or already terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_succeeded(&self, id: RetryId) -> Result<bool> {
        self.mark_terminal(id, RetryStatus::Succeeded).await
    }

    /// Moves a pending record to `exhausted`.
    ///
    /// Returns false if the record is missing or already terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_exhausted(&self, id: RetryId) -> Result<bool> {
        self.mark_terminal(id, RetryStatus::Exhausted).await
    }

    async fn mark_terminal(&self, id: RetryId, status: RetryStatus) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE callback_retries
            SET status = $2, next_retry_at = NULL
            WHERE id = $1 AND status = 'pending'
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records a failed replay on a pending record.
    ///
    /// Increments `attempts`, stores `error` and sets `next_retry_at` to
    /// `schedule(new_attempts)`. Returns the new attempt count, or `None` if
    /// the record is missing or terminal.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    pub async fn mark_failed<F>(&self, id: RetryId, error: &str, schedule: F) -> Result<Option<i32>>
    where
        F: FnOnce(u32) -> DateTime<Utc> + Send,
    {
        let mut tx = self.pool.begin().await?;

        let attempts: Option<i32> = sqlx::query_scalar(
            "SELECT attempts FROM callback_retries WHERE id = $1 AND status = 'pending' FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(attempts) = attempts else {
            tx.rollback().await?;
            return Ok(None);
        };

        let new_attempts = attempts.saturating_add(1);
        let next_retry_at = schedule(u32::try_from(new_attempts).unwrap_or(u32::MAX));

        sqlx::query(
            r"
            UPDATE callback_retries
            SET attempts = $2, last_error = $3, next_retry_at = $4
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(new_attempts)
        .bind(error)
        .bind(next_retry_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(new_attempts))
    }
}
