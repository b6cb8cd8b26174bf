//! Replication module
//!
//! Standing subscriber that mirrors upstream "create-account" messages
//! into the account store, independently of the ledger's own locking.

mod listener;
mod message;
mod source;

#[cfg(feature = "kafka")]
mod kafka;

pub use listener::{ApplyOutcome, ReplicationError, ReplicationListener, ReplicationStats};
pub use message::{MessageError, MirroredAccount, ReplicationAction, CREATE_ACCOUNT};
pub use source::{EventSource, InboundRecord, SourceError};

#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
