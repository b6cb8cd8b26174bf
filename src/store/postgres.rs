//! PostgreSQL Account Store
//!
//! Row locks are `SELECT ... FOR UPDATE` inside a `sqlx::Transaction`; they
//! are released by COMMIT or ROLLBACK, including the implicit rollback when
//! the transaction is dropped.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Account, AccountId, AccountName, Balance};
use crate::publisher::OutboundMessage;

use super::{account_from_row, AccountStore, OutboxRecord, OutboxStore, StoreError, StoreTransaction};

/// Per-transaction bounds on blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTimeouts {
    /// Maximum wait for a row lock
    pub lock_timeout: Duration,
    /// Maximum duration of any single statement
    pub statement_timeout: Duration,
}

impl Default for StoreTimeouts {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(30),
        }
    }
}

/// Account store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
    timeouts: StoreTimeouts,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeouts: StoreTimeouts::default(),
        }
    }

    pub fn with_timeouts(pool: PgPool, timeouts: StoreTimeouts) -> Self {
        Self { pool, timeouts }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // set_config(..., true) is SET LOCAL: scoped to this transaction
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.timeouts.lock_timeout.as_millis()))
            .bind(format!("{}ms", self.timeouts.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row: Option<(i64, String, Decimal)> =
            sqlx::query_as("SELECT id, name, balance FROM accounts WHERE id = $1")
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id, name, balance)| account_from_row(id, name, balance))
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let rows: Vec<(i64, String, Decimal)> =
            sqlx::query_as("SELECT id, name, balance FROM accounts ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id, name, balance)| account_from_row(id, name, balance))
            .collect()
    }
}

/// Transaction scope holding a pooled connection
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert(
        &mut self,
        name: &AccountName,
        balance: Balance,
    ) -> Result<Account, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (name, balance)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(name.as_str())
        .bind(balance.value())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(Account::new(AccountId::new(id), name.clone(), balance))
    }

    async fn insert_mirrored(
        &mut self,
        name: &AccountName,
        balance: Balance,
        external_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (name, balance, external_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(name.as_str())
        .bind(balance.value())
        .bind(external_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(id.map(|id| Account::new(AccountId::new(id), name.clone(), balance)))
    }

    async fn get_for_update(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row: Option<(i64, String, Decimal)> = sqlx::query_as(
            r#"
            SELECT id, name, balance
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_lock_attempt(e, id))?;

        row.map(|(id, name, balance)| account_from_row(id, name, balance))
            .transpose()
    }

    async fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account.id.value())
        .bind(account.balance.value())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StoreError::from_lock_attempt(e, account.id))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::MissingRow(account.id));
        }

        Ok(())
    }

    async fn enqueue(&mut self, message: &OutboundMessage) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_outbox (event_id, topic, message_key, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(message.event_id)
        .bind(&message.topic)
        .bind(message.key.as_deref())
        .bind(&message.payload)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn checkpoint(&mut self, source: &str) -> Result<Option<i64>, StoreError> {
        let offset: Option<i64> = sqlx::query_scalar(
            "SELECT last_offset FROM replication_checkpoints WHERE source = $1 FOR UPDATE",
        )
        .bind(source)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(offset)
    }

    async fn advance_checkpoint(&mut self, source: &str, offset: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO replication_checkpoints (source, last_offset)
            VALUES ($1, $2)
            ON CONFLICT (source)
            DO UPDATE SET
                last_offset = GREATEST(replication_checkpoints.last_offset, EXCLUDED.last_offset),
                updated_at = NOW()
            "#,
        )
        .bind(source)
        .bind(offset)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgAccountStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows: Vec<(i64, Uuid, String, Option<String>, serde_json::Value, i32)> = sqlx::query_as(
            r#"
            SELECT id, event_id, topic, message_key, payload, attempts
            FROM ledger_outbox
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, event_id, topic, key, payload, attempts)| OutboxRecord {
                id,
                message: OutboundMessage {
                    event_id,
                    topic,
                    key,
                    payload,
                },
                attempts,
            })
            .collect())
    }

    async fn mark_published(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE ledger_outbox
            SET published_at = NOW(), attempts = attempts + 1, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE ledger_outbox
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = StoreTimeouts::default();
        assert_eq!(timeouts.lock_timeout, Duration::from_secs(5));
        assert_eq!(timeouts.statement_timeout, Duration::from_secs(30));
    }
}
