//! In-process broker
//!
//! Retains every message per topic so it can be read back from offset 0,
//! the way a broker topic is consumed from the beginning. Memory grows
//! with every publish, so this backs tests, not a running service.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::replication::{EventSource, InboundRecord, SourceError};

use super::{EventPublisher, OutboundMessage, PublishError};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, Vec<StoredMessage>>>,
    appended: Notify,
    unavailable: AtomicBool,
    failures_pending: AtomicUsize,
}

/// Topic log held in memory
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` publishes with a delivery error
    pub fn fail_next(&self, count: usize) {
        self.state.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Reject every publish until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Append a raw payload to `topic`, bypassing fault injection
    pub async fn produce(&self, topic: &str, key: Option<String>, payload: Vec<u8>) {
        let mut topics = self.state.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .push(StoredMessage { key, payload });
        drop(topics);
        self.state.appended.notify_waiters();
    }

    /// Decoded JSON payloads on `topic`, oldest first
    pub async fn messages(&self, topic: &str) -> Vec<serde_json::Value> {
        let topics = self.state.topics.lock().await;
        topics
            .get(topic)
            .map(|log| {
                log.iter()
                    .filter_map(|m| serde_json::from_slice(&m.payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Message keys on `topic`, oldest first
    pub async fn keys(&self, topic: &str) -> Vec<Option<String>> {
        let topics = self.state.topics.lock().await;
        topics
            .get(topic)
            .map(|log| log.iter().map(|m| m.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Total messages across all topics
    pub async fn total(&self) -> usize {
        self.state.topics.lock().await.values().map(Vec::len).sum()
    }

    /// Read `topic` from its first message
    pub fn subscribe(&self, topic: &str) -> TopicSource {
        TopicSource {
            broker: self.clone(),
            topic: topic.to_string(),
            position: 0,
        }
    }

    async fn read_at(&self, topic: &str, position: usize) -> Option<StoredMessage> {
        let topics = self.state.topics.lock().await;
        topics.get(topic).and_then(|log| log.get(position).cloned())
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("in-memory broker is offline".to_string()));
        }

        let injected = self
            .state
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PublishError::Delivery {
                topic: message.topic.clone(),
                reason: "injected failure".to_string(),
            });
        }

        let payload = serde_json::to_vec(&message.payload)?;
        self.produce(&message.topic, message.key.clone(), payload).await;
        Ok(())
    }
}

/// Single-partition reader over one in-memory topic
pub struct TopicSource {
    broker: InMemoryBroker,
    topic: String,
    position: usize,
}

impl TopicSource {
    fn record(&mut self, message: StoredMessage) -> InboundRecord {
        let offset = self.position as i64;
        self.position += 1;
        InboundRecord {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            key: message.key,
            payload: message.payload,
        }
    }
}

#[async_trait]
impl EventSource for TopicSource {
    async fn next(&mut self) -> Result<Option<InboundRecord>, SourceError> {
        loop {
            // Register interest before checking so an append in between is not missed
            let state = Arc::clone(&self.broker.state);
            let appended = state.appended.notified();

            if let Some(message) = self.broker.read_at(&self.topic, self.position).await {
                return Ok(Some(self.record(message)));
            }

            appended.await;
        }
    }

    async fn try_next(&mut self) -> Result<Option<InboundRecord>, SourceError> {
        match self.broker.read_at(&self.topic, self.position).await {
            Some(message) => Ok(Some(self.record(message))),
            None => Ok(None),
        }
    }
}
