//! Ledger module
//!
//! Transactional operations over accounts: create, deposit, withdraw,
//! transfer and the two read-only queries.

mod coordinator;


pub use coordinator::{lock_order, Ledger, LedgerOptions, TransferReceipt, DEFAULT_USER_LIST_LIMIT};
