// ============================================================================
// Outbox Errors
// ============================================================================

/// Failure while recording an event into the outbox. A caller holding an open
/// transaction must treat any of these as fatal for that transaction, so the
/// business mutation and the missing record roll back together.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("correlation id must be non-empty")]
    MissingCorrelationId,

    #[error("event aggregate id must not be nil")]
    NilAggregateId,

    #[error("failed to serialize event payload")]
    Serialization(#[source] serde_json::Error),

    #[error("failed to persist outbox record")]
    Persistence(#[from] sqlx::Error),
}

/// Failure inside the outbox storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("outbox storage error: {0}")]
    Database(#[from] sqlx::Error),
}
