//! Domain module
//!
//! Core ledger types: validated money, accounts and outbound events.

pub mod account;
pub mod amount;
pub mod events;

pub use account::{Account, AccountId, AccountName, AccountNameError};
pub use amount::{Amount, AmountError, Balance};
pub use events::{AccountSummary, EventEnvelope, EventKind, LedgerEvent};
