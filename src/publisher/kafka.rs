//! Kafka publisher
//!
//! One `FutureProducer` created at startup and shared by every publish.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

use super::{EventPublisher, OutboundMessage, PublishError};

/// Upper bound on waiting for a broker acknowledgement
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on draining the producer queue at shutdown
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn connect(brokers: &str, client_id: &str) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("message.timeout.ms", DELIVERY_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        tracing::info!(brokers = %brokers, client_id = %client_id, "Kafka producer created");
        Ok(Self { producer })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&message.payload)?;

        let mut record = FutureRecord::<str, [u8]>::to(&message.topic).payload(&payload);
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(DELIVERY_TIMEOUT))
            .await
            .map_err(|(e, _)| PublishError::Delivery {
                topic: message.topic.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(
            topic = %message.topic,
            partition = partition,
            offset = offset,
            event_id = %message.event_id,
            "Event delivered to Kafka"
        );
        Ok(())
    }

    /// Wait for in-flight messages before shutdown
    async fn flush(&self) -> Result<(), PublishError> {
        // librdkafka's flush blocks the calling thread
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        tracing::info!("Kafka producer flushed");
        Ok(())
    }
}
