use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::StoreError;
use super::record::OutboxRecord;

// ============================================================================
// Outbox Store - Dispatcher-Side Storage Abstraction
// ============================================================================
//
// The recorder writes rows inside the caller's transaction; everything after
// that goes through this trait. Injecting the store (rather than talking to
// the database directly) keeps the dispatcher testable against the in-memory
// implementation.
//
// ============================================================================

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Pending records whose `next_attempt_at` has passed, oldest first.
    async fn fetch_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Atomically move a record from Pending to InProgress. Returns `None`
    /// when the record was already claimed, published, or failed by someone
    /// else; with concurrent dispatchers exactly one caller gets the record.
    async fn claim(&self, id: Uuid) -> Result<Option<OutboxRecord>, StoreError>;

    /// InProgress -> Published after a confirmed delivery.
    async fn mark_published(&self, id: Uuid) -> Result<(), StoreError>;

    /// InProgress -> Pending after a failed delivery, carrying the new
    /// attempt count, the error, and the backoff deadline.
    async fn reschedule(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// InProgress -> Failed once the retry budget is exhausted.
    async fn mark_failed(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), StoreError>;

    /// Return InProgress records claimed before the cutoff to Pending. Covers
    /// a dispatcher that crashed between claim and status update; the publish
    /// may have gone out, which is why delivery is at-least-once.
    async fn release_stale_claims(&self, claimed_before: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Failed records for inspection, oldest first. Served by the admin
    /// endpoint on the operational HTTP server.
    async fn failed(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Requeue a Failed record for another round of delivery attempts.
    /// Returns false when the record is not in the Failed state.
    async fn retry_failed(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Number of records still waiting to be published.
    async fn pending_count(&self) -> Result<i64, StoreError>;
}
