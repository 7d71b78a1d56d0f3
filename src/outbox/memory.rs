use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::errors::StoreError;
use super::record::{OutboxRecord, OutboxStatus};
use super::store::OutboxStore;

// ============================================================================
// In-Memory Outbox Store
// ============================================================================
//
// Implements the same claim/transition contract as the Postgres store over a
// mutex-guarded vector. Every transition happens under one lock acquisition,
// so claims are atomic exactly like the conditional UPDATE they stand in for.
// Used by the dispatcher tests; also handy for local experiments without a
// database.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOutboxStore {
    records: Mutex<Vec<OutboxRecord>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: OutboxRecord) {
        self.records.lock().await.push(record);
    }

    pub async fn get(&self, id: Uuid) -> Option<OutboxRecord> {
        self.records
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let records = self.records.lock().await;

        // Only aggregate heads: a record with an older unpublished sibling
        // stays back until that sibling is published.
        let mut due: Vec<OutboxRecord> = records
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending && r.next_attempt_at <= now)
            .filter(|r| {
                !records.iter().any(|other| {
                    other.aggregate_id == r.aggregate_id
                        && other.status != OutboxStatus::Published
                        && (other.created_at, other.id) < (r.created_at, r.id)
                })
            })
            .cloned()
            .collect();

        due.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        due.truncate(limit);

        Ok(due)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let mut records = self.records.lock().await;

        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == OutboxStatus::Pending)
        {
            Some(record) => {
                record.status = OutboxStatus::InProgress;
                record.claimed_at = Some(Utc::now());
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;

        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.status == OutboxStatus::InProgress)
        {
            record.status = OutboxStatus::Published;
            record.published_at = Some(Utc::now());
            record.claimed_at = None;
        }

        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;

        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.status == OutboxStatus::InProgress)
        {
            record.status = OutboxStatus::Pending;
            record.attempts = attempts;
            record.last_error = Some(error.to_string());
            record.next_attempt_at = next_attempt_at;
            record.claimed_at = None;
        }

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;

        if let Some(record) = records
            .iter_mut()
            .find(|r| r.id == id && r.status == OutboxStatus::InProgress)
        {
            record.status = OutboxStatus::Failed;
            record.attempts = attempts;
            record.last_error = Some(error.to_string());
            record.claimed_at = None;
        }

        Ok(())
    }

    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.lock().await;
        let mut released = 0;

        for record in records.iter_mut() {
            if record.status == OutboxStatus::InProgress
                && record.claimed_at.map(|t| t < claimed_before).unwrap_or(true)
            {
                record.status = OutboxStatus::Pending;
                record.claimed_at = None;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn failed(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let records = self.records.lock().await;

        let mut failed: Vec<OutboxRecord> = records
            .iter()
            .filter(|r| r.status == OutboxStatus::Failed)
            .cloned()
            .collect();

        failed.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        failed.truncate(limit);

        Ok(failed)
    }

    async fn retry_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;

        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == OutboxStatus::Failed)
        {
            Some(record) => {
                record.status = OutboxStatus::Pending;
                record.attempts = 0;
                record.last_error = None;
                record.next_attempt_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn pending_count(&self) -> Result<i64, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::event::OutboxEvent;
    use serde::Serialize;
    use std::sync::Arc;

    #[derive(Serialize)]
    struct Noted {
        aggregate_id: Uuid,
        occurred_at: DateTime<Utc>,
    }

    impl OutboxEvent for Noted {
        fn event_type(&self) -> &str {
            "Noted"
        }

        fn aggregate_id(&self) -> Uuid {
            self.aggregate_id
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.occurred_at
        }
    }

    fn record_for(aggregate_id: Uuid) -> OutboxRecord {
        let event = Noted {
            aggregate_id,
            occurred_at: Utc::now(),
        };
        OutboxRecord::build(&event, "Note", "note-events", "corr-1").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_due_returns_oldest_first() {
        let store = InMemoryOutboxStore::new();

        let mut first = record_for(Uuid::new_v4());
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = record_for(Uuid::new_v4());

        // Insert newest first to prove ordering comes from created_at
        store.insert(second.clone()).await;
        store.insert(first.clone()).await;

        let due = store.fetch_due(10, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, first.id);
        assert_eq!(due[1].id, second.id);
    }

    #[tokio::test]
    async fn test_fetch_due_surfaces_only_the_head_of_each_aggregate() {
        let store = InMemoryOutboxStore::new();
        let aggregate_id = Uuid::new_v4();

        let mut head = record_for(aggregate_id);
        head.created_at = Utc::now() - chrono::Duration::seconds(10);
        let tail = record_for(aggregate_id);

        store.insert(head.clone()).await;
        store.insert(tail.clone()).await;

        // Only the head is due while it is unpublished
        let due = store.fetch_due(10, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, head.id);

        // A head waiting on a backoff deadline still hides the tail
        {
            let mut records = store.records.lock().await;
            let r = records.iter_mut().find(|r| r.id == head.id).unwrap();
            r.next_attempt_at = Utc::now() + chrono::Duration::seconds(60);
        }
        assert!(store.fetch_due(10, Utc::now()).await.unwrap().is_empty());

        // Once the head is published the tail becomes visible
        {
            let mut records = store.records.lock().await;
            let r = records.iter_mut().find(|r| r.id == head.id).unwrap();
            r.status = OutboxStatus::Published;
        }
        let due = store.fetch_due(10, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, tail.id);
    }

    #[tokio::test]
    async fn test_fetch_due_skips_backoff_deadlines_in_the_future() {
        let store = InMemoryOutboxStore::new();

        let mut waiting = record_for(Uuid::new_v4());
        waiting.next_attempt_at = Utc::now() + chrono::Duration::seconds(30);
        store.insert(waiting).await;
        store.insert(record_for(Uuid::new_v4())).await;

        let due = store.fetch_due(10, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = InMemoryOutboxStore::new();
        let record = record_for(Uuid::new_v4());
        store.insert(record.clone()).await;

        let first = store.claim(record.id).await.unwrap();
        let second = store.claim(record.id).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(
            store.get(record.id).await.unwrap().status,
            OutboxStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_concurrent_claimers_exactly_one_wins() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let record = record_for(Uuid::new_v4());
        store.insert(record.clone()).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = record.id;
            handles.push(tokio::spawn(async move { store.claim(id).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_reschedule_returns_record_to_pending() {
        let store = InMemoryOutboxStore::new();
        let record = record_for(Uuid::new_v4());
        store.insert(record.clone()).await;

        store.claim(record.id).await.unwrap().unwrap();
        let next = Utc::now() + chrono::Duration::seconds(5);
        store
            .reschedule(record.id, 1, "broker timeout", next)
            .await
            .unwrap();

        let stored = store.get(record.id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error.as_deref(), Some("broker timeout"));
        assert_eq!(stored.next_attempt_at, next);
    }

    #[tokio::test]
    async fn test_release_stale_claims_only_touches_old_claims() {
        let store = InMemoryOutboxStore::new();
        let stale = record_for(Uuid::new_v4());
        let fresh = record_for(Uuid::new_v4());
        store.insert(stale.clone()).await;
        store.insert(fresh.clone()).await;

        store.claim(stale.id).await.unwrap();
        // Backdate the stale claim past the cutoff
        {
            let mut records = store.records.lock().await;
            let r = records.iter_mut().find(|r| r.id == stale.id).unwrap();
            r.claimed_at = Some(Utc::now() - chrono::Duration::minutes(10));
        }
        store.claim(fresh.id).await.unwrap();

        let released = store
            .release_stale_claims(Utc::now() - chrono::Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(released, 1);
        assert_eq!(
            store.get(stale.id).await.unwrap().status,
            OutboxStatus::Pending
        );
        assert_eq!(
            store.get(fresh.id).await.unwrap().status,
            OutboxStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_retry_failed_requeues_with_fresh_attempt_budget() {
        let store = InMemoryOutboxStore::new();
        let record = record_for(Uuid::new_v4());
        store.insert(record.clone()).await;

        store.claim(record.id).await.unwrap();
        store
            .mark_failed(record.id, 5, "broker unreachable")
            .await
            .unwrap();

        let failed = store.failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 5);

        assert!(store.retry_failed(record.id).await.unwrap());
        let stored = store.get(record.id).await.unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert!(stored.last_error.is_none());

        // A second replay of the same id is a no-op
        assert!(!store.retry_failed(record.id).await.unwrap());
    }
}
