use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

use super::publisher::{EventPublisher, PublishError};
use crate::outbox::OutboxRecord;
use crate::utils::Breaker;

// ============================================================================
// Kafka Publisher
// ============================================================================
//
// Wire format, per record:
// - topic:   taken from the record (one topic per aggregate type)
// - key:     aggregate id, so one aggregate's events share a partition and
//            keep their relative order
// - payload: the serialized event exactly as recorded
// - headers: event-id (the dedup key), event-type, correlation-id
//
// A circuit breaker sits in front of the producer so a dead broker turns
// into fast CircuitOpen errors instead of a delivery timeout per record.
//
// ============================================================================

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaPublisher {
    producer: FutureProducer,
    breaker: Breaker,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, breaker: Breaker) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer, breaker })
    }

    fn headers_for(record: &OutboxRecord) -> OwnedHeaders {
        OwnedHeaders::new()
            .insert(Header {
                key: "event-id",
                value: Some(&record.dedup_key()),
            })
            .insert(Header {
                key: "event-type",
                value: Some(record.event_type.as_str()),
            })
            .insert(Header {
                key: "correlation-id",
                value: Some(record.correlation_id.as_str()),
            })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, record: &OutboxRecord) -> Result<(), PublishError> {
        if !self.breaker.allow_request().await {
            tracing::warn!(
                record_id = %record.id,
                topic = %record.topic,
                "publish rejected, circuit open"
            );
            return Err(PublishError::CircuitOpen);
        }

        let key = record.aggregate_id.to_string();
        let future_record = FutureRecord::to(&record.topic)
            .key(&key)
            .payload(&record.payload)
            .headers(Self::headers_for(record));

        match self
            .producer
            .send(future_record, rdkafka::util::Timeout::After(SEND_TIMEOUT))
            .await
        {
            Ok(_) => {
                self.breaker.on_success().await;
                tracing::info!(
                    record_id = %record.id,
                    topic = %record.topic,
                    key = %key,
                    event_type = %record.event_type,
                    "published to kafka"
                );
                Ok(())
            }
            Err((e, _)) => {
                self.breaker.on_failure().await;
                Err(PublishError::Transport(e.to_string()))
            }
        }
    }
}
