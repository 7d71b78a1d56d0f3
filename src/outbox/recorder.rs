use sqlx::{Postgres, Transaction};

use super::errors::RecordError;
use super::event::OutboxEvent;
use super::record::OutboxRecord;

// ============================================================================
// Outbox Event Recorder
// ============================================================================
//
// Writes one outbox row as part of the caller's active transaction. The
// recorder never opens or commits a transaction itself: if the caller's
// transaction commits, the record is durably visible to the dispatcher; if
// it rolls back, no record exists. That is the whole atomicity guarantee of
// the pattern, and it holds because this insert and the business mutation
// share a transaction.
//
// One recorder instance is configured per aggregate type, carrying the
// aggregate's type name and destination topic, so call sites only supply the
// event and the correlation id.
//
// ============================================================================

pub struct OutboxRecorder {
    aggregate_type: String,
    topic: String,
}

impl OutboxRecorder {
    pub fn new(aggregate_type: &str, topic: &str) -> Self {
        Self {
            aggregate_type: aggregate_type.to_string(),
            topic: topic.to_string(),
        }
    }

    /// Validate, serialize and insert the event as a pending outbox record
    /// inside `tx`. Does not publish anything synchronously.
    pub async fn record<E: OutboxEvent + Sync>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &E,
        correlation_id: &str,
    ) -> Result<OutboxRecord, RecordError> {
        let record = OutboxRecord::build(event, &self.aggregate_type, &self.topic, correlation_id)?;

        sqlx::query(
            "INSERT INTO outbox_records (
                id, aggregate_id, aggregate_type, event_type, topic, payload,
                correlation_id, status, attempts, created_at, next_attempt_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(record.id)
        .bind(record.aggregate_id)
        .bind(&record.aggregate_type)
        .bind(&record.event_type)
        .bind(&record.topic)
        .bind(&record.payload)
        .bind(&record.correlation_id)
        .bind(record.status.as_str())
        .bind(record.attempts)
        .bind(record.created_at)
        .bind(record.next_attempt_at)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            record_id = %record.id,
            aggregate_id = %record.aggregate_id,
            event_type = %record.event_type,
            correlation_id = %record.correlation_id,
            "recorded outbox event"
        );

        Ok(record)
    }
}
