//! Outbox Relay
//!
//! Background task that moves committed outbox rows to the broker.
//! Rows are published oldest first; the first failure ends the batch so
//! later events on the same account never overtake an earlier one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use crate::store::{OutboxStore, StoreError};

use super::EventPublisher;

/// Floor for the poll period; `tokio::time::interval` rejects zero
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the outbox relay
#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// Delay between polls (default: 500ms)
    pub poll_interval: Duration,
    /// Rows fetched per poll (default: 100)
    pub batch_size: usize,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

/// Result of one relay pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

/// Outbox relay: polls pending rows and publishes them
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_config(outbox, publisher, OutboxRelayConfig::default())
    }

    pub fn with_config(
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            config,
        }
    }

    /// Start the relay in the background until `shutdown` flips to true
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox relay started"
        );

        let mut ticker = interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.relay_once().await {
                        tracing::error!(error = %e, "Outbox relay pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Last flush so events committed just before shutdown are not left behind
        match self.relay_once().await {
            Ok(report) if report.published > 0 => {
                tracing::info!(published = report.published, "Outbox flushed on shutdown");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Outbox flush on shutdown failed"),
        }

        if let Err(e) = self.publisher.flush().await {
            tracing::error!(error = %e, "Publisher flush on shutdown failed");
        }

        tracing::info!("Outbox relay stopped");
    }

    /// Publish one batch of pending rows
    pub async fn relay_once(&self) -> Result<RelayReport, StoreError> {
        let pending = self.outbox.pending_outbox(self.config.batch_size).await?;
        let mut report = RelayReport::default();

        for record in pending {
            match self.publisher.publish(&record.message).await {
                Ok(()) => {
                    self.outbox.mark_published(record.id).await?;
                    report.published += 1;
                    tracing::debug!(
                        outbox_id = record.id,
                        topic = %record.message.topic,
                        event_id = %record.message.event_id,
                        "Relayed outbox event"
                    );
                }
                Err(e) => {
                    self.outbox.mark_failed(record.id, &e.to_string()).await?;
                    report.failed += 1;
                    tracing::warn!(
                        outbox_id = record.id,
                        topic = %record.message.topic,
                        attempts = record.attempts + 1,
                        error = %e,
                        "Outbox publish failed, will retry"
                    );
                    break;
                }
            }
        }

        Ok(report)
    }
}
