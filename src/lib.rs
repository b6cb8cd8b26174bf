//! ledger_engine Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod domain;
pub mod ledger;
pub mod publisher;
pub mod replication;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{Account, AccountId, AccountName, Amount, AmountError, Balance, LedgerEvent};
pub use error::{AppError, AppResult, ErrorKind, ErrorResponse};
pub use ledger::{Ledger, LedgerOptions, TransferReceipt};
pub use publisher::{DeliveryMode, EventPublisher, InMemoryBroker, LoggingPublisher, OutboxRelay, Topics};
pub use store::{AccountStore, InMemoryAccountStore, PgAccountStore, StoreError};
