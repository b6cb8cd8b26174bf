//! Kafka record source

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::time::Duration;

use super::source::{EventSource, InboundRecord, SourceError};

/// How long `try_next` waits before reporting the topic as drained
const POLL_GRACE: Duration = Duration::from_millis(200);

pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl KafkaSource {
    /// Subscribe to `topic`, starting from the earliest retained offset
    /// when the group has no committed position
    pub fn subscribe(
        brokers: &str,
        group_id: &str,
        client_id: &str,
        topic: &str,
    ) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("client.id", client_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        tracing::info!(topic = %topic, group_id = %group_id, "Kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> InboundRecord {
    InboundRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

#[async_trait]
impl EventSource for KafkaSource {
    async fn next(&mut self) -> Result<Option<InboundRecord>, SourceError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Some(to_record(&message)))
    }

    async fn try_next(&mut self) -> Result<Option<InboundRecord>, SourceError> {
        match tokio::time::timeout(POLL_GRACE, self.consumer.recv()).await {
            Ok(Ok(message)) => Ok(Some(to_record(&message))),
            Ok(Err(e)) => Err(SourceError::Transport(e.to_string())),
            Err(_) => Ok(None),
        }
    }
}
