//! Ledger Coordinator
//!
//! Every mutating operation runs as one store transaction: lock the rows it
//! touches, check the business rules, write the new balances, hand the
//! events to the broker (outbox or direct), then commit. Any error before
//! the commit rolls the whole unit back.
//!
//! Transfers lock their two rows in ascending id order. Two transfers that
//! cross in opposite directions therefore queue on the same first lock
//! instead of each holding one row and waiting for the other.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::domain::{Account, AccountId, AccountName, Amount, Balance, LedgerEvent};
use crate::error::{AppError, AppResult};
use crate::publisher::{DeliveryMode, EventPublisher, Topics};
use crate::store::{AccountStore, StoreTransaction};

/// Default cap on accounts carried by one `user-list` event
pub const DEFAULT_USER_LIST_LIMIT: usize = 1000;

/// Tunables for the coordinator
#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub delivery: DeliveryMode,
    pub topics: Topics,
    pub user_list_limit: usize,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::default(),
            topics: Topics::default(),
            user_list_limit: DEFAULT_USER_LIST_LIMIT,
        }
    }
}

/// Outcome of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub source_id: AccountId,
    pub destination_id: AccountId,
    pub amount: Amount,
    pub source_balance: Balance,
    pub destination_balance: Balance,
}

/// Order in which a pair of rows must be locked
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Entry point for all ledger operations
pub struct Ledger {
    store: Arc<dyn AccountStore>,
    publisher: Arc<dyn EventPublisher>,
    options: LedgerOptions,
}

impl Ledger {
    pub fn new(store: Arc<dyn AccountStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_options(store, publisher, LedgerOptions::default())
    }

    pub fn with_options(
        store: Arc<dyn AccountStore>,
        publisher: Arc<dyn EventPublisher>,
        options: LedgerOptions,
    ) -> Self {
        Self {
            store,
            publisher,
            options,
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Open a new account with a zero balance
    pub async fn create_account(&self, name: &str) -> AppResult<Account> {
        let name = AccountName::new(name)?;

        let mut tx = self.store.begin().await?;
        let result = self.create_in(tx.as_mut(), &name).await;
        let account = self.finish(tx, result).await?;

        tracing::info!(account_id = %account.id, name = %account.name, "Account created");
        Ok(account)
    }

    /// Add `amount` to an account, returning the new balance
    pub async fn deposit(&self, id: AccountId, amount: Decimal) -> AppResult<Balance> {
        let amount = Amount::new(amount)?;

        let mut tx = self.store.begin().await?;
        let result = self.deposit_in(tx.as_mut(), id, amount).await;
        let balance = self.finish(tx, result).await?;

        tracing::info!(account_id = %id, amount = %amount, balance = %balance, "Deposit committed");
        Ok(balance)
    }

    /// Take `amount` from an account, returning the new balance
    pub async fn withdraw(&self, id: AccountId, amount: Decimal) -> AppResult<Balance> {
        let amount = Amount::new(amount)?;

        let mut tx = self.store.begin().await?;
        let result = self.withdraw_in(tx.as_mut(), id, amount).await;
        let balance = self.finish(tx, result).await?;

        tracing::info!(account_id = %id, amount = %amount, balance = %balance, "Withdrawal committed");
        Ok(balance)
    }

    /// Move `amount` between two accounts as one unit
    pub async fn transfer(
        &self,
        source_id: AccountId,
        destination_id: AccountId,
        amount: Decimal,
    ) -> AppResult<TransferReceipt> {
        let amount = Amount::new(amount)?;
        if source_id == destination_id {
            return Err(AppError::Validation(
                "Cannot transfer to the same account".to_string(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let result = self
            .transfer_in(tx.as_mut(), source_id, destination_id, amount)
            .await;
        let receipt = self.finish(tx, result).await?;

        tracing::info!(
            source_id = %source_id,
            destination_id = %destination_id,
            amount = %amount,
            "Transfer committed"
        );
        Ok(receipt)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current balance, read without locking
    pub async fn get_balance(&self, id: AccountId) -> AppResult<Balance> {
        let account = self.store.get(id).await?.ok_or(AppError::NotFound(id))?;

        self.notify(&LedgerEvent::balance_check(id, &account.balance))
            .await;
        Ok(account.balance)
    }

    /// All accounts in ascending id order
    pub async fn list_accounts(&self) -> AppResult<Vec<Account>> {
        let accounts = self.store.list().await?;

        self.notify(&LedgerEvent::user_list(&accounts, self.options.user_list_limit))
            .await;
        Ok(accounts)
    }

    // =========================================================================
    // Transaction bodies
    // =========================================================================

    async fn create_in(
        &self,
        tx: &mut dyn StoreTransaction,
        name: &AccountName,
    ) -> AppResult<Account> {
        let account = tx.insert(name, Balance::zero()).await?;
        self.emit(tx, &LedgerEvent::account_created(&account)).await?;
        Ok(account)
    }

    async fn deposit_in(
        &self,
        tx: &mut dyn StoreTransaction,
        id: AccountId,
        amount: Amount,
    ) -> AppResult<Balance> {
        let mut account = self.lock_account(tx, id).await?;
        let balance = account.credit(&amount)?;
        tx.save(&account).await?;

        self.emit(tx, &LedgerEvent::deposit(id, &amount)).await?;
        Ok(balance)
    }

    async fn withdraw_in(
        &self,
        tx: &mut dyn StoreTransaction,
        id: AccountId,
        amount: Amount,
    ) -> AppResult<Balance> {
        let mut account = self.lock_account(tx, id).await?;
        ensure_sufficient(&account, &amount)?;

        let balance = account.debit(&amount)?;
        tx.save(&account).await?;

        self.emit(tx, &LedgerEvent::withdrawal(id, &amount)).await?;
        Ok(balance)
    }

    async fn transfer_in(
        &self,
        tx: &mut dyn StoreTransaction,
        source_id: AccountId,
        destination_id: AccountId,
        amount: Amount,
    ) -> AppResult<TransferReceipt> {
        let (mut source, mut destination) = self.lock_pair(tx, source_id, destination_id).await?;
        ensure_sufficient(&source, &amount)?;

        let source_balance = source.debit(&amount)?;
        let destination_balance = destination.credit(&amount)?;
        tx.save(&source).await?;
        tx.save(&destination).await?;

        self.emit(tx, &LedgerEvent::withdrawal(source_id, &amount)).await?;
        self.emit(tx, &LedgerEvent::deposit(destination_id, &amount)).await?;

        Ok(TransferReceipt {
            source_id,
            destination_id,
            amount,
            source_balance,
            destination_balance,
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn lock_account(
        &self,
        tx: &mut dyn StoreTransaction,
        id: AccountId,
    ) -> AppResult<Account> {
        tx.get_for_update(id).await?.ok_or(AppError::NotFound(id))
    }

    /// Lock both rows in ascending id order, returned as `(a, b)`
    async fn lock_pair(
        &self,
        tx: &mut dyn StoreTransaction,
        a: AccountId,
        b: AccountId,
    ) -> AppResult<(Account, Account)> {
        let (first_id, second_id) = lock_order(a, b);
        let first = self.lock_account(tx, first_id).await?;
        let second = self.lock_account(tx, second_id).await?;

        if first_id == a {
            Ok((first, second))
        } else {
            Ok((second, first))
        }
    }

    /// Hand an event to the broker as part of the current transaction
    async fn emit(&self, tx: &mut dyn StoreTransaction, event: &LedgerEvent) -> AppResult<()> {
        let message = self.options.topics.route(event)?;

        match self.options.delivery {
            DeliveryMode::Outbox => tx.enqueue(&message).await?,
            DeliveryMode::Direct => {
                self.publisher.publish(&message).await?;
                tracing::debug!(topic = %message.topic, event_id = %message.event_id, "Event published");
            }
        }

        Ok(())
    }

    /// Publish an informational event; failures are logged and dropped
    async fn notify(&self, event: &LedgerEvent) {
        let result = match self.options.topics.route(event) {
            Ok(message) => self.publisher.publish(&message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            tracing::warn!(event = %event.kind(), error = %e, "Informational event not published");
        }
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(&self, tx: Box<dyn StoreTransaction>, result: AppResult<T>) -> AppResult<T> {
        match result {
            Ok(value) => {
                if let Err(e) = tx.commit().await {
                    if self.options.delivery == DeliveryMode::Direct {
                        tracing::warn!(
                            error = %e,
                            "Commit failed after events were published; consumers may see orphaned notifications"
                        );
                    }
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(err) => {
                match &err {
                    AppError::Validation(_)
                    | AppError::NotFound(_)
                    | AppError::InsufficientFunds { .. } => {
                        tracing::debug!(error = %err, "Operation rejected")
                    }
                    AppError::Persistence(_) | AppError::Publish(_) => {
                        tracing::error!(error = %err, "Operation failed, rolling back")
                    }
                }

                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "Rollback failed; the connection discards the transaction");
                }
                Err(err)
            }
        }
    }
}

fn ensure_sufficient(account: &Account, amount: &Amount) -> AppResult<()> {
    if account.balance.is_sufficient_for(amount) {
        Ok(())
    } else {
        Err(AppError::InsufficientFunds {
            account_id: account.id,
            requested: amount.value(),
            available: account.balance.value(),
        })
    }
}
