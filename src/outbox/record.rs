use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::RecordError;
use super::event::OutboxEvent;

// ============================================================================
// Outbox Record - One Row in the Durable Outbox
// ============================================================================
//
// Created by the recorder inside the caller's transaction, then driven
// through its lifecycle by the dispatcher:
//
//   Pending ──claim──► InProgress ──publish ok──► Published
//                          │
//                          ├─ publish failed, attempts < max ──► Pending
//                          │  (rescheduled with backoff)
//                          └─ publish failed, attempts = max ──► Failed
//
// The record id is stable across retries and is carried as a message header,
// so downstream consumers can use it as a deduplication key.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    InProgress,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::InProgress => "in_progress",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "in_progress" => Some(OutboxStatus::InProgress),
            "published" => Some(OutboxStatus::Published),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub topic: String,
    pub payload: String,
    pub correlation_id: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Validate and serialize an event into a pending record. Nothing is
    /// stored here; the recorder binds the result to the caller's
    /// transaction. Rejects rather than storing a half-formed row.
    pub fn build<E: OutboxEvent>(
        event: &E,
        aggregate_type: &str,
        topic: &str,
        correlation_id: &str,
    ) -> Result<Self, RecordError> {
        if correlation_id.trim().is_empty() {
            return Err(RecordError::MissingCorrelationId);
        }

        let aggregate_id = event.aggregate_id();
        if aggregate_id.is_nil() {
            return Err(RecordError::NilAggregateId);
        }

        let payload = serde_json::to_string(event).map_err(RecordError::Serialization)?;
        let now = Utc::now();

        Ok(Self {
            // v7 ids are time-ordered, which keeps (created_at, id) a total
            // order even for records created in the same millisecond
            id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: event.event_type().to_string(),
            topic: topic.to_string(),
            payload,
            correlation_id: correlation_id.to_string(),
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            next_attempt_at: now,
            claimed_at: None,
            published_at: None,
        })
    }

    /// Stable deduplication key for downstream consumers.
    pub fn dedup_key(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestEvent {
        aggregate_id: Uuid,
        value: String,
        occurred_at: DateTime<Utc>,
    }

    impl OutboxEvent for TestEvent {
        fn event_type(&self) -> &str {
            "TestHappened"
        }

        fn aggregate_id(&self) -> Uuid {
            self.aggregate_id
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.occurred_at
        }
    }

    fn test_event() -> TestEvent {
        TestEvent {
            aggregate_id: Uuid::new_v4(),
            value: "hello".to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_produces_pending_record() {
        let event = test_event();
        let record = OutboxRecord::build(&event, "TestAggregate", "test-events", "corr-1").unwrap();

        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.aggregate_id, event.aggregate_id);
        assert_eq!(record.event_type, "TestHappened");
        assert_eq!(record.topic, "test-events");
        assert_eq!(record.correlation_id, "corr-1");
        assert_eq!(record.attempts, 0);
        assert!(record.last_error.is_none());
        assert!(record.payload.contains("hello"));
    }

    #[test]
    fn test_build_rejects_empty_correlation_id() {
        let event = test_event();

        let err = OutboxRecord::build(&event, "TestAggregate", "test-events", "  ").unwrap_err();
        assert!(matches!(err, RecordError::MissingCorrelationId));
    }

    #[test]
    fn test_build_rejects_nil_aggregate_id() {
        let event = TestEvent {
            aggregate_id: Uuid::nil(),
            value: "x".to_string(),
            occurred_at: Utc::now(),
        };

        let err = OutboxRecord::build(&event, "TestAggregate", "test-events", "corr-1").unwrap_err();
        assert!(matches!(err, RecordError::NilAggregateId));
    }

    #[test]
    fn test_dedup_key_is_the_record_id() {
        let event = test_event();
        let record = OutboxRecord::build(&event, "TestAggregate", "test-events", "corr-1").unwrap();

        assert_eq!(record.dedup_key(), record.id.to_string());
        // Stable across calls
        assert_eq!(record.dedup_key(), record.dedup_key());
    }

    #[test]
    fn test_record_ids_are_time_ordered() {
        let event = test_event();
        let first = OutboxRecord::build(&event, "TestAggregate", "test-events", "corr-1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = OutboxRecord::build(&event, "TestAggregate", "test-events", "corr-1").unwrap();

        assert!(first.id < second.id);
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::InProgress,
            OutboxStatus::Published,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("bogus"), None);
    }
}
