//! Account Store module
//!
//! Durable table of accounts. Locked reads and the writes that follow them
//! happen inside one [`StoreTransaction`], so a row lock covers the whole
//! read-modify-write. Dropping a transaction without committing rolls it
//! back and releases every lock it holds.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;

use crate::domain::{Account, AccountId, AccountName, Balance};
use crate::publisher::OutboundMessage;

pub use error::StoreError;
pub use memory::InMemoryAccountStore;
pub use postgres::{PgAccountStore, StoreTimeouts};

/// Unlocked reads and transaction entry point
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Open a new atomic transaction scope
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Point lookup without locking
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Full scan in ascending id order
    async fn list(&self) -> Result<Vec<Account>, StoreError>;
}

/// One atomic unit of work against the store
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert a new account; the id is assigned by the store
    async fn insert(&mut self, name: &AccountName, balance: Balance)
        -> Result<Account, StoreError>;

    /// Insert an account mirrored from an external source, keyed by its
    /// external id. Returns `None` when that id was already mirrored.
    async fn insert_mirrored(
        &mut self,
        name: &AccountName,
        balance: Balance,
        external_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Read an account and hold an exclusive lock on it until the
    /// transaction ends
    async fn get_for_update(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Persist the balance of an account locked (or inserted) by this transaction
    async fn save(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Queue an outbound message; it becomes visible to the relay on commit
    async fn enqueue(&mut self, message: &OutboundMessage) -> Result<(), StoreError>;

    /// Last replicated offset recorded for `source`
    async fn checkpoint(&mut self, source: &str) -> Result<Option<i64>, StoreError>;

    /// Record `offset` as replicated for `source`; never moves backwards
    async fn advance_checkpoint(&mut self, source: &str, offset: i64) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Outbox row awaiting delivery
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: i64,
    pub message: OutboundMessage,
    pub attempts: i32,
}

/// Committed outbox access for the relay
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Undelivered messages, oldest first
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn mark_published(&self, id: i64) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError>;
}

/// Build an [`Account`] from raw column values
pub(crate) fn account_from_row(
    id: i64,
    name: String,
    balance: rust_decimal::Decimal,
) -> Result<Account, StoreError> {
    let id = AccountId::new(id);
    let name = AccountName::new(name).map_err(|e| StoreError::CorruptRow {
        id,
        reason: e.to_string(),
    })?;
    let balance = Balance::new(balance).map_err(|e| StoreError::CorruptRow {
        id,
        reason: e.to_string(),
    })?;
    Ok(Account::new(id, name, balance))
}
