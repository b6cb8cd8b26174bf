//! Account entity
//!
//! The only persistent record of the ledger: a surrogate id, an immutable
//! display name and the current balance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Amount, AmountError, Balance};

/// Surrogate key assigned by the store at creation, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for AccountId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Errors raised while validating an account name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountNameError {
    #[error("account name must not be empty")]
    Empty,

    #[error("account name is too long (max {max} characters, got {actual})")]
    TooLong { max: usize, actual: usize },
}

/// Non-empty display label, fixed at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountName(String);

impl AccountName {
    pub const MAX_LEN: usize = 255;

    /// Validate and wrap a name. Surrounding whitespace is trimmed first.
    pub fn new(value: impl AsRef<str>) -> Result<Self, AccountNameError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(AccountNameError::Empty);
        }

        let len = trimmed.chars().count();
        if len > Self::MAX_LEN {
            return Err(AccountNameError::TooLong {
                max: Self::MAX_LEN,
                actual: len,
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccountName {
    type Error = AccountNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountName::new(value)
    }
}

impl From<AccountName> for String {
    fn from(name: AccountName) -> Self {
        name.0
    }
}

/// A monetary account.
///
/// Only the balance is ever mutated, and only through [`Account::credit`] and
/// [`Account::debit`], which keep it non-negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: AccountName,
    pub balance: Balance,
}

impl Account {
    pub fn new(id: AccountId, name: AccountName, balance: Balance) -> Self {
        Self { id, name, balance }
    }

    /// Apply a deposit, returning the new balance
    pub fn credit(&mut self, amount: &Amount) -> Result<Balance, AmountError> {
        self.balance = self.balance.credit(amount)?;
        Ok(self.balance)
    }

    /// Apply a withdrawal. Callers check sufficiency first so they can
    /// report the shortfall; this still refuses to go negative.
    pub fn debit(&mut self, amount: &Amount) -> Result<Balance, AmountError> {
        self.balance = self.balance.debit(amount)?;
        Ok(self.balance)
    }
}
