use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Outbox Event Contract
// ============================================================================
//
// Anything the business layer wants published through the outbox implements
// this trait. The payload stored in the outbox is the serde serialization of
// the event, so the JSON shape is owned by the event type itself.
//
// ============================================================================

pub trait OutboxEvent: Serialize {
    /// Tag written to the outbox row and carried as a message header
    fn event_type(&self) -> &str;

    /// Identity of the mutated entity; also the Kafka partition key,
    /// so events of one aggregate land on one partition in order
    fn aggregate_id(&self) -> Uuid;

    /// When the mutation happened
    fn occurred_at(&self) -> DateTime<Utc>;
}
