//! Replication Listener
//!
//! Mirrors accounts created upstream into the local store. Each record is
//! applied in its own transaction together with the partition checkpoint,
//! so a restart that re-reads the topic from the beginning skips what was
//! already applied. Records that carry an external id are additionally
//! deduplicated on that id.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::domain::AccountId;
use crate::store::{AccountStore, StoreError};

use super::message::{MessageError, ReplicationAction};
use super::source::{EventSource, InboundRecord, SourceError};

/// Delay before retrying a record whose transaction failed
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// What happened to one inbound record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(AccountId),
    /// Offset already checkpointed, or external id already mirrored
    Duplicate,
    /// Not a replication message
    Ignored,
    /// Replication message that failed validation
    Invalid(String),
}

/// Counters accumulated by the listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub applied: u64,
    pub skipped_duplicate: u64,
    pub skipped_invalid: u64,
    pub ignored: u64,
}

impl ReplicationStats {
    fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied(_) => self.applied += 1,
            ApplyOutcome::Duplicate => self.skipped_duplicate += 1,
            ApplyOutcome::Invalid(_) => self.skipped_invalid += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

pub struct ReplicationListener {
    store: Arc<dyn AccountStore>,
    source: Box<dyn EventSource>,
    stats: ReplicationStats,
}

impl ReplicationListener {
    pub fn new(store: Arc<dyn AccountStore>, source: Box<dyn EventSource>) -> Self {
        Self {
            store,
            source,
            stats: ReplicationStats::default(),
        }
    }

    pub fn stats(&self) -> ReplicationStats {
        self.stats
    }

    /// Apply one record and its checkpoint atomically
    pub async fn apply(&self, record: &InboundRecord) -> Result<ApplyOutcome, StoreError> {
        let source = record.source();
        let mut tx = self.store.begin().await?;

        if let Some(last) = tx.checkpoint(&source).await? {
            if record.offset <= last {
                tx.rollback().await?;
                return Ok(ApplyOutcome::Duplicate);
            }
        }

        let outcome = match ReplicationAction::parse(&record.payload) {
            Ok(ReplicationAction::CreateAccount(mirrored)) => {
                let inserted = match mirrored.external_id.as_deref() {
                    Some(external_id) => {
                        tx.insert_mirrored(&mirrored.name, mirrored.balance, external_id)
                            .await?
                    }
                    None => Some(tx.insert(&mirrored.name, mirrored.balance).await?),
                };

                match inserted {
                    Some(account) => ApplyOutcome::Applied(account.id),
                    None => ApplyOutcome::Duplicate,
                }
            }
            Err(MessageError::NoAction) => ApplyOutcome::Ignored,
            Err(e) => ApplyOutcome::Invalid(e.to_string()),
        };

        tx.advance_checkpoint(&source, record.offset).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    async fn handle(&mut self, record: &InboundRecord) -> Result<(), StoreError> {
        let outcome = self.apply(record).await?;

        match &outcome {
            ApplyOutcome::Applied(account_id) => tracing::info!(
                account_id = %account_id,
                source = %record.source(),
                offset = record.offset,
                "Mirrored account"
            ),
            ApplyOutcome::Duplicate => tracing::debug!(
                source = %record.source(),
                offset = record.offset,
                "Skipped already replicated record"
            ),
            ApplyOutcome::Ignored => tracing::trace!(
                source = %record.source(),
                offset = record.offset,
                "Ignored non-replication record"
            ),
            ApplyOutcome::Invalid(reason) => tracing::warn!(
                source = %record.source(),
                offset = record.offset,
                reason = %reason,
                "Skipped invalid replication record"
            ),
        }

        self.stats.record(&outcome);
        Ok(())
    }

    /// Apply every record currently available, then return
    pub async fn drain(&mut self) -> Result<ReplicationStats, ReplicationError> {
        let before = self.stats;

        while let Some(record) = self.source.try_next().await? {
            self.handle(&record).await?;
        }

        Ok(ReplicationStats {
            applied: self.stats.applied - before.applied,
            skipped_duplicate: self.stats.skipped_duplicate - before.skipped_duplicate,
            skipped_invalid: self.stats.skipped_invalid - before.skipped_invalid,
            ignored: self.stats.ignored - before.ignored,
        })
    }

    /// Consume until the source ends or `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ReplicationStats {
        tracing::info!("Replication listener started");

        loop {
            let next = tokio::select! {
                next = self.source.next() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Replication source error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => continue,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            // A failed transaction leaves no checkpoint, so the record is retried
            while let Err(e) = self.handle(&record).await {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        source = %record.source(),
                        offset = record.offset,
                        "Replication record contended, retrying"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        source = %record.source(),
                        offset = record.offset,
                        "Failed to apply replication record, retrying"
                    );
                }

                tokio::select! {
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                    _ = shutdown.changed() => {
                        tracing::info!(stats = ?self.stats, "Replication listener stopped");
                        return self.stats;
                    }
                }
            }
        }

        tracing::info!(stats = ?self.stats, "Replication listener stopped");
        self.stats
    }

    /// Run in the background
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<ReplicationStats> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::InMemoryBroker;
    use crate::store::InMemoryAccountStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Scripted source: yields each entry once, then reports exhaustion
    struct ScriptedSource {
        script: VecDeque<Result<InboundRecord, SourceError>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next(&mut self) -> Result<Option<InboundRecord>, SourceError> {
            self.script.pop_front().transpose()
        }

        async fn try_next(&mut self) -> Result<Option<InboundRecord>, SourceError> {
            self.next().await
        }
    }

    const TOPIC: &str = "new-account";

    async fn produce(broker: &InMemoryBroker, payload: &str) {
        broker.produce(TOPIC, None, payload.as_bytes().to_vec()).await;
    }

    fn listener(store: &InMemoryAccountStore, broker: &InMemoryBroker) -> ReplicationListener {
        ReplicationListener::new(Arc::new(store.clone()), Box::new(broker.subscribe(TOPIC)))
    }

    #[tokio::test]
    async fn test_mirrors_create_account() {
        let store = InMemoryAccountStore::new();
        let broker = InMemoryBroker::new();
        produce(&broker, r#"{"action":"create-account","data":{"acNm":"Dana","balance":40}}"#).await;

        let stats = listener(&store, &broker).drain().await.unwrap();

        assert_eq!(stats.applied, 1);
        let accounts = store.list().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name.as_str(), "Dana");
    }

    #[tokio::test]
    async fn test_replay_from_beginning_does_not_duplicate() {
        let store = InMemoryAccountStore::new();
        let broker = InMemoryBroker::new();
        produce(&broker, r#"{"action":"create-account","data":{"name":"Dana","balance":0}}"#).await;
        produce(&broker, r#"{"action":"create-account","data":{"name":"Eve","balance":0}}"#).await;

        listener(&store, &broker).drain().await.unwrap();

        // A restarted consumer reads the whole topic again
        let replay = listener(&store, &broker).drain().await.unwrap();

        assert_eq!(replay.applied, 0);
        assert_eq!(replay.skipped_duplicate, 2);
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn test_external_id_deduplicates_repeated_messages() {
        let store = InMemoryAccountStore::new();
        let broker = InMemoryBroker::new();
        let message = r#"{"action":"create-account","data":{"name":"Dana","externalId":"crm-1"}}"#;
        produce(&broker, message).await;
        produce(&broker, message).await;

        let stats = listener(&store, &broker).drain().await.unwrap();

        assert_eq!(stats.applied, 1);
        assert_eq!(stats.skipped_duplicate, 1);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_bad_records_are_skipped_not_fatal() {
        let store = InMemoryAccountStore::new();
        let broker = InMemoryBroker::new();
        produce(&broker, "garbage").await;
        produce(&broker, r#"{"action":"create-account","data":{"name":""}}"#).await;
        produce(&broker, r#"{"action":"delete-account","data":{"id":1}}"#).await;
        produce(&broker, r#"{"accountId":9,"name":"Zed","balance":"0"}"#).await;
        produce(&broker, r#"{"action":"create-account","data":{"name":"Ok"}}"#).await;

        let stats = listener(&store, &broker).drain().await.unwrap();

        assert_eq!(stats.skipped_invalid, 3);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = InMemoryAccountStore::new();
        let broker = InMemoryBroker::new();
        let (tx, rx) = watch::channel(false);

        let handle = listener(&store, &broker).spawn(rx);
        produce(&broker, r#"{"action":"create-account","data":{"name":"Live"}}"#).await;

        // Wait for the record to land before stopping
        for _ in 0..100 {
            if store.count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("listener should stop")
            .unwrap();

        assert_eq!(stats.applied, 1);
    }

    #[tokio::test]
    async fn test_run_survives_transient_source_error() {
        let store = InMemoryAccountStore::new();
        let record = InboundRecord {
            topic: TOPIC.to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: br#"{"action":"create-account","data":{"name":"Late"}}"#.to_vec(),
        };
        let source = ScriptedSource {
            script: VecDeque::from(vec![
                Err(SourceError::Transport("Broker: Unknown topic or partition".to_string())),
                Ok(record),
            ]),
        };
        let (_tx, rx) = watch::channel(false);

        let stats = tokio::time::timeout(
            Duration::from_secs(5),
            ReplicationListener::new(Arc::new(store.clone()), Box::new(source)).run(rx),
        )
        .await
        .expect("listener should finish once the source is exhausted");

        assert_eq!(stats.applied, 1);
        assert_eq!(store.count().await, 1);
    }
}
