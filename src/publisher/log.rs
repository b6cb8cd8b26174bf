//! Logging publisher
//!
//! Stand-in for a broker when none is configured: every message is written
//! to the log and then dropped. Nothing is retained.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{EventPublisher, OutboundMessage, PublishError};

#[derive(Debug, Default)]
pub struct LoggingPublisher {
    published: AtomicU64,
}

impl LoggingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages logged since startup
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), PublishError> {
        let count = self.published.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!(
            topic = %message.topic,
            key = ?message.key,
            event_id = %message.event_id,
            payload = %message.payload,
            count = count,
            "Event published (no broker configured)"
        );
        Ok(())
    }
}
