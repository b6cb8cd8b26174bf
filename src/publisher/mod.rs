//! Event Publisher module
//!
//! Routes ledger events to broker topics and sends them. Mutating
//! operations either hand messages to the transactional outbox (relayed
//! later by [`OutboxRelay`]) or publish them directly before commit.

mod log;
mod memory;
mod outbox;
mod topics;

#[cfg(feature = "kafka")]
mod kafka;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub use log::LoggingPublisher;
pub use memory::{InMemoryBroker, TopicSource};
pub use outbox::{OutboxRelay, OutboxRelayConfig, RelayReport};
pub use topics::Topics;

#[cfg(feature = "kafka")]
pub use kafka::KafkaPublisher;

/// A routed, serialized message ready for the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event_id: Uuid,
    pub topic: String,
    /// Partitioning key; the account id where the event has one
    pub key: Option<String>,
    pub payload: serde_json::Value,
}

/// Errors raised while publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery to topic '{topic}' failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sends one message to its topic
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError>;

    /// Wait for buffered messages to reach the broker
    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// How mutating operations hand their events to the broker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Write to the outbox inside the mutation's transaction
    #[default]
    Outbox,
    /// Publish before commit; a failure rolls the mutation back
    Direct,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Outbox => "outbox",
            DeliveryMode::Direct => "direct",
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outbox" => Ok(DeliveryMode::Outbox),
            "direct" => Ok(DeliveryMode::Direct),
            other => Err(format!("unknown delivery mode: {}", other)),
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
