//! Store Errors
//!
//! Error types for account store operations.

use crate::domain::AccountId;

/// Postgres SQLSTATE for `lock_not_available` (raised when lock_timeout expires)
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Postgres SQLSTATE for `query_canceled` (raised when statement_timeout expires)
const QUERY_CANCELED: &str = "57014";

/// Errors that can occur in the account store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row lock could not be acquired within the configured bound
    #[error("Timed out waiting for lock on account {0}")]
    LockTimeout(AccountId),

    /// Transaction exceeded the statement timeout
    #[error("Statement timed out")]
    StatementTimeout,

    /// A write targeted a row this transaction never locked
    #[error("Account {0} is not locked by this transaction")]
    NotLocked(AccountId),

    /// An update matched no row
    #[error("Account {0} disappeared during the transaction")]
    MissingRow(AccountId),

    /// A stored row violates a domain invariant
    #[error("Corrupt row for account {id}: {reason}")]
    CorruptRow { id: AccountId, reason: String },

    /// Unique constraint or concurrent insert conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a database error raised while locking `id`
    pub(crate) fn from_lock_attempt(err: sqlx::Error, id: AccountId) -> Self {
        match sqlstate(&err).as_deref() {
            Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout(id),
            Some(QUERY_CANCELED) => StoreError::StatementTimeout,
            _ => StoreError::Database(err),
        }
    }

    /// Check if the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout(_) | StoreError::StatementTimeout | StoreError::Conflict(_)
        )
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}
