//! In-memory Account Store
//!
//! Same contract as the PostgreSQL store: each account row carries its own
//! async mutex acting as the row lock, writes are staged in the transaction
//! and applied together on commit under the table write lock, and dropping
//! an uncommitted transaction discards its writes and releases its locks.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::{Account, AccountId, AccountName, Balance};
use crate::publisher::OutboundMessage;

use super::{AccountStore, OutboxRecord, OutboxStore, StoreError, StoreTransaction};

struct Row {
    account: Account,
    lock: Arc<Mutex<()>>,
}

struct OutboxEntry {
    id: i64,
    message: OutboundMessage,
    attempts: i32,
    last_error: Option<String>,
    published: bool,
}

#[derive(Default)]
struct Tables {
    rows: BTreeMap<AccountId, Row>,
    external_ids: HashMap<String, AccountId>,
    outbox: Vec<OutboxEntry>,
    next_outbox_id: i64,
    checkpoints: HashMap<String, i64>,
}

struct Shared {
    tables: RwLock<Tables>,
    next_id: AtomicI64,
    lock_timeout: Duration,
    fail_next_commit: AtomicBool,
}

/// Process-local store with row-level locking
#[derive(Clone)]
pub struct InMemoryAccountStore {
    shared: Arc<Shared>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                next_id: AtomicI64::new(1),
                lock_timeout,
                fail_next_commit: AtomicBool::new(false),
            }),
        }
    }

    /// Make the next commit fail after its work is done, as a lost
    /// connection at COMMIT would.
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of committed accounts
    pub async fn count(&self) -> usize {
        self.shared.tables.read().await.rows.len()
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            guards: HashMap::new(),
            updates: BTreeMap::new(),
            inserts: Vec::new(),
            outbox: Vec::new(),
            checkpoints: HashMap::new(),
        }))
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables.rows.get(&id).map(|row| row.account.clone()))
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables.rows.values().map(|row| row.account.clone()).collect())
    }
}

#[async_trait]
impl OutboxStore for InMemoryAccountStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let tables = self.shared.tables.read().await;
        Ok(tables
            .outbox
            .iter()
            .filter(|entry| !entry.published)
            .take(limit)
            .map(|entry| OutboxRecord {
                id: entry.id,
                message: entry.message.clone(),
                attempts: entry.attempts,
            })
            .collect())
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.shared.tables.write().await;
        if let Some(entry) = tables.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.published = true;
            entry.attempts += 1;
            entry.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let mut tables = self.shared.tables.write().await;
        if let Some(entry) = tables.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

struct StagedInsert {
    account: Account,
    external_id: Option<String>,
}

/// Transaction over [`InMemoryAccountStore`]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    updates: BTreeMap<AccountId, Account>,
    inserts: Vec<StagedInsert>,
    outbox: Vec<OutboundMessage>,
    checkpoints: HashMap<String, i64>,
}

impl InMemoryTransaction {
    fn staged_insert_mut(&mut self, id: AccountId) -> Option<&mut StagedInsert> {
        self.inserts.iter_mut().find(|staged| staged.account.id == id)
    }

    fn stage_insert(
        &mut self,
        name: &AccountName,
        balance: Balance,
        external_id: Option<String>,
    ) -> Account {
        // Ids are consumed even if the transaction rolls back, like a sequence
        let id = AccountId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let account = Account::new(id, name.clone(), balance);
        self.inserts.push(StagedInsert {
            account: account.clone(),
            external_id,
        });
        account
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn insert(
        &mut self,
        name: &AccountName,
        balance: Balance,
    ) -> Result<Account, StoreError> {
        Ok(self.stage_insert(name, balance, None))
    }

    async fn insert_mirrored(
        &mut self,
        name: &AccountName,
        balance: Balance,
        external_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let staged = self
            .inserts
            .iter()
            .any(|s| s.external_id.as_deref() == Some(external_id));
        let committed = self
            .shared
            .tables
            .read()
            .await
            .external_ids
            .contains_key(external_id);

        if staged || committed {
            return Ok(None);
        }

        Ok(Some(self.stage_insert(name, balance, Some(external_id.to_string()))))
    }

    async fn get_for_update(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        if let Some(staged) = self.staged_insert_mut(id) {
            return Ok(Some(staged.account.clone()));
        }
        if let Some(pending) = self.updates.get(&id) {
            return Ok(Some(pending.clone()));
        }

        if !self.guards.contains_key(&id) {
            let lock = {
                let tables = self.shared.tables.read().await;
                match tables.rows.get(&id) {
                    Some(row) => Arc::clone(&row.lock),
                    None => return Ok(None),
                }
            };

            let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout(id))?;
            self.guards.insert(id, guard);
        }

        // Committed state cannot change while we hold the row lock
        let tables = self.shared.tables.read().await;
        Ok(tables.rows.get(&id).map(|row| row.account.clone()))
    }

    async fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        if let Some(staged) = self.staged_insert_mut(account.id) {
            staged.account = account.clone();
            return Ok(());
        }
        if !self.guards.contains_key(&account.id) {
            return Err(StoreError::NotLocked(account.id));
        }

        self.updates.insert(account.id, account.clone());
        Ok(())
    }

    async fn enqueue(&mut self, message: &OutboundMessage) -> Result<(), StoreError> {
        self.outbox.push(message.clone());
        Ok(())
    }

    async fn checkpoint(&mut self, source: &str) -> Result<Option<i64>, StoreError> {
        if let Some(offset) = self.checkpoints.get(source) {
            return Ok(Some(*offset));
        }
        let tables = self.shared.tables.read().await;
        Ok(tables.checkpoints.get(source).copied())
    }

    async fn advance_checkpoint(&mut self, source: &str, offset: i64) -> Result<(), StoreError> {
        let current = self.checkpoint(source).await?;
        self.checkpoints
            .insert(source.to_string(), current.map_or(offset, |c| c.max(offset)));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = *self;

        if this.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict("commit failed (injected)".to_string()));
        }

        let mut tables = this.shared.tables.write().await;

        for staged in &this.inserts {
            if let Some(external_id) = &staged.external_id {
                if tables.external_ids.contains_key(external_id) {
                    return Err(StoreError::Conflict(format!(
                        "external id {} already mirrored",
                        external_id
                    )));
                }
            }
        }

        for staged in this.inserts.drain(..) {
            if let Some(external_id) = &staged.external_id {
                tables
                    .external_ids
                    .insert(external_id.clone(), staged.account.id);
            }
            tables.rows.insert(
                staged.account.id,
                Row {
                    account: staged.account,
                    lock: Arc::new(Mutex::new(())),
                },
            );
        }

        for (id, account) in std::mem::take(&mut this.updates) {
            match tables.rows.get_mut(&id) {
                Some(row) => row.account = account,
                None => return Err(StoreError::MissingRow(id)),
            }
        }

        for message in this.outbox.drain(..) {
            tables.next_outbox_id += 1;
            let id = tables.next_outbox_id;
            tables.outbox.push(OutboxEntry {
                id,
                message,
                attempts: 0,
                last_error: None,
                published: false,
            });
        }

        for (source, offset) in this.checkpoints.drain() {
            let entry = tables.checkpoints.entry(source).or_insert(offset);
            *entry = (*entry).max(offset);
        }

        drop(tables);
        // Row guards in `this` are released only after the new state is visible
        drop(this);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Amount;
    use rust_decimal_macros::dec;

    fn name(value: &str) -> AccountName {
        AccountName::new(value).unwrap()
    }

    async fn seeded(store: &InMemoryAccountStore, balance: rust_decimal::Decimal) -> Account {
        let mut tx = store.begin().await.unwrap();
        let account = tx
            .insert(&name("Alice"), Balance::new(balance).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_insert_visible_only_after_commit() {
        let store = InMemoryAccountStore::new();
        let mut tx = store.begin().await.unwrap();
        let account = tx.insert(&name("Alice"), Balance::zero()).await.unwrap();

        assert_eq!(account.id, AccountId::new(1));
        assert!(store.get(account.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert_eq!(store.get(account.id).await.unwrap(), Some(account));
    }

    #[tokio::test]
    async fn test_rolled_back_ids_are_not_reused() {
        let store = InMemoryAccountStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&name("Ghost"), Balance::zero()).await.unwrap();
        tx.rollback().await.unwrap();

        let account = seeded(&store, dec!(0)).await;
        assert_eq!(account.id, AccountId::new(2));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes_and_releases_lock() {
        let store = InMemoryAccountStore::with_lock_timeout(Duration::from_millis(200));
        let account = seeded(&store, dec!(10)).await;

        {
            let mut tx = store.begin().await.unwrap();
            let mut locked = tx.get_for_update(account.id).await.unwrap().unwrap();
            locked.credit(&Amount::new(dec!(5)).unwrap()).unwrap();
            tx.save(&locked).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let locked = tx.get_for_update(account.id).await.unwrap().unwrap();
        assert_eq!(locked.balance.value(), dec!(10));
    }

    #[tokio::test]
    async fn test_lock_wait_is_bounded() {
        let store = InMemoryAccountStore::with_lock_timeout(Duration::from_millis(50));
        let account = seeded(&store, dec!(10)).await;

        let mut holder = store.begin().await.unwrap();
        holder.get_for_update(account.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_for_update(account.id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(id) if id == account.id));
    }

    #[tokio::test]
    async fn test_save_requires_lock() {
        let store = InMemoryAccountStore::new();
        let account = seeded(&store, dec!(10)).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.save(&account).await.unwrap_err();
        assert!(matches!(err, StoreError::NotLocked(_)));
    }

    #[tokio::test]
    async fn test_missing_account_is_none() {
        let store = InMemoryAccountStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_for_update(AccountId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mirrored_insert_skips_known_external_id() {
        let store = InMemoryAccountStore::new();

        let mut tx = store.begin().await.unwrap();
        let first = tx
            .insert_mirrored(&name("Carol"), Balance::zero(), "ext-1")
            .await
            .unwrap();
        let again = tx
            .insert_mirrored(&name("Carol"), Balance::zero(), "ext-1")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(first.is_some());
        assert!(again.is_none());

        let mut tx = store.begin().await.unwrap();
        let later = tx
            .insert_mirrored(&name("Carol"), Balance::zero(), "ext-1")
            .await
            .unwrap();
        assert!(later.is_none());
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backwards() {
        let store = InMemoryAccountStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.advance_checkpoint("new-account/0", 7).await.unwrap();
        tx.advance_checkpoint("new-account/0", 3).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.checkpoint("new-account/0").await.unwrap(), Some(7));
        assert_eq!(tx.checkpoint("new-account/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_outbox_rows_appear_on_commit() {
        let store = InMemoryAccountStore::new();
        let message = OutboundMessage {
            event_id: uuid::Uuid::new_v4(),
            topic: "deposit".to_string(),
            key: Some("1".to_string()),
            payload: serde_json::json!({"accountId": 1, "amount": "5"}),
        };

        let mut tx = store.begin().await.unwrap();
        tx.enqueue(&message).await.unwrap();
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
        tx.commit().await.unwrap();

        let pending = store.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message.topic, "deposit");

        store.mark_failed(pending[0].id, "broker down").await.unwrap();
        assert_eq!(store.pending_outbox(10).await.unwrap()[0].attempts, 1);

        store.mark_published(pending[0].id).await.unwrap();
        assert!(store.pending_outbox(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_commit_failure_discards_everything() {
        let store = InMemoryAccountStore::new();
        store.fail_next_commit();

        let mut tx = store.begin().await.unwrap();
        tx.insert(&name("Alice"), Balance::zero()).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.count().await, 0);
    }
}
