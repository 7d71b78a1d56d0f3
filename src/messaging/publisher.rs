use async_trait::async_trait;

use crate::outbox::OutboxRecord;

// ============================================================================
// Event Publisher Seam
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The circuit breaker rejected the send without touching the broker
    #[error("publisher unavailable: circuit open")]
    CircuitOpen,

    #[error("broker send failed: {0}")]
    Transport(String),
}

/// Delivers one outbox record to the messaging system. The dispatcher only
/// sees this trait; production wires in Kafka, tests wire in a mock.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), PublishError>;
}
