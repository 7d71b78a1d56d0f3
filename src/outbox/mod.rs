// ============================================================================
// Transactional Outbox
// ============================================================================
//
// Reliable event publication in two halves:
//
// - recorder: called by business code, writes the event into the outbox
//   table inside the caller's own transaction (mutation and record commit or
//   roll back together)
// - dispatcher: background task that claims pending records and pushes them
//   to the broker with retries, backoff and a failed-record parking lot
//
// Storage is behind the OutboxStore trait: Postgres in production, in-memory
// for tests.
//
// ============================================================================

pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod memory;
pub mod pg;
pub mod record;
pub mod recorder;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use errors::{RecordError, StoreError};
pub use event::OutboxEvent;
pub use pg::PgOutboxStore;
pub use record::{OutboxRecord, OutboxStatus};
pub use recorder::OutboxRecorder;
pub use store::OutboxStore;
