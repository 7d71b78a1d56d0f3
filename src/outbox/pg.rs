use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::errors::StoreError;
use super::record::{OutboxRecord, OutboxStatus};
use super::store::OutboxStore;

// ============================================================================
// Postgres Outbox Store
// ============================================================================
//
// Status is stored as text and every transition is a conditional UPDATE
// guarded by the current status, so claims are a compare-and-set: with
// several dispatcher instances running, only one UPDATE matches the
// `status = 'pending'` predicate and only that instance gets the row back.
//
// `fetch_due` only surfaces the head of each aggregate: a record with an
// older unpublished sibling (pending in backoff, claimed elsewhere, or
// parked as failed) stays invisible until that sibling is published, so an
// aggregate's events can never overtake each other across passes or
// instances.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS outbox_records (
        id UUID PRIMARY KEY,
        aggregate_id UUID NOT NULL,
        aggregate_type TEXT NOT NULL,
        event_type TEXT NOT NULL,
        topic TEXT NOT NULL,
        payload TEXT NOT NULL,
        correlation_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INT NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        next_attempt_at TIMESTAMPTZ NOT NULL,
        claimed_at TIMESTAMPTZ,
        published_at TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_records_due
        ON outbox_records (status, next_attempt_at, created_at)",
];

const RECORD_COLUMNS: &str = "id, aggregate_id, aggregate_type, event_type, topic, payload, \
     correlation_id, status, attempts, last_error, created_at, next_attempt_at, \
     claimed_at, published_at";

/// Create the outbox table and index if they do not exist yet.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("outbox schema ready");
    Ok(())
}

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_record(row: &PgRow) -> Result<OutboxRecord, sqlx::Error> {
    let status_text: String = row.try_get("status")?;
    let status = OutboxStatus::parse(&status_text).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: format!("unknown outbox status '{}'", status_text).into(),
    })?;

    Ok(OutboxRecord {
        id: row.try_get("id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        topic: row.try_get("topic")?,
        payload: row.try_get("payload")?,
        correlation_id: row.try_get("correlation_id")?,
        status,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        claimed_at: row.try_get("claimed_at")?,
        published_at: row.try_get("published_at")?,
    })
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn fetch_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM outbox_records
             WHERE status = 'pending' AND next_attempt_at <= $1
               AND NOT EXISTS (
                   SELECT 1 FROM outbox_records older
                   WHERE older.aggregate_id = outbox_records.aggregate_id
                     AND older.status <> 'published'
                     AND (older.created_at, older.id)
                         < (outbox_records.created_at, outbox_records.id)
               )
             ORDER BY created_at, id
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(decode_record(row)?);
        }

        Ok(records)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let sql = format!(
            "UPDATE outbox_records
             SET status = 'in_progress', claimed_at = $2
             WHERE id = $1 AND status = 'pending'
             RETURNING {RECORD_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(decode_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox_records
             SET status = 'published', published_at = $2, claimed_at = NULL
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox_records
             SET status = 'pending', attempts = $2, last_error = $3,
                 next_attempt_at = $4, claimed_at = NULL
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox_records
             SET status = 'failed', attempts = $2, last_error = $3, claimed_at = NULL
             WHERE id = $1 AND status = 'in_progress'",
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_records
             SET status = 'pending', claimed_at = NULL
             WHERE status = 'in_progress' AND claimed_at < $1",
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn failed(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM outbox_records
             WHERE status = 'failed'
             ORDER BY created_at, id
             LIMIT $1"
        );

        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(decode_record(row)?);
        }

        Ok(records)
    }

    async fn retry_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE outbox_records
             SET status = 'pending', attempts = 0, last_error = NULL, next_attempt_at = $2
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn pending_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM outbox_records WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>(0)?)
    }
}

// The claim/transition contract is exercised through the in-memory store,
// which mirrors it. Commit/rollback atomicity with the business row is
// covered by the DATABASE_URL-gated tests in the profile service module.
