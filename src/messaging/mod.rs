pub mod kafka;
pub mod publisher;

pub use kafka::KafkaPublisher;
pub use publisher::{EventPublisher, PublishError};
