//! Inbound record sources

use async_trait::async_trait;

/// One record read from a broker partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl InboundRecord {
    /// Checkpoint key: offsets are only ordered within one partition
    pub fn source(&self) -> String {
        format!("{}/{}", self.topic, self.partition)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source transport error: {0}")]
    Transport(String),
}

/// Ordered stream of inbound records
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Wait for the next record. `None` means the source is exhausted.
    async fn next(&mut self) -> Result<Option<InboundRecord>, SourceError>;

    /// Next record if one is already available, without waiting
    async fn try_next(&mut self) -> Result<Option<InboundRecord>, SourceError>;
}
