//! Ledger Events
//!
//! Notifications emitted for each completed or attempted operation.
//! They are fire-once messages, not a journal: nothing replays them to
//! rebuild balances.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Account, AccountId, Amount, Balance};

/// Event kinds, one outbound topic each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    AccountCreated,
    Deposit,
    Withdrawal,
    BalanceCheck,
    UserList,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AccountCreated => "account-created",
            EventKind::Deposit => "deposit",
            EventKind::Withdrawal => "withdrawal",
            EventKind::BalanceCheck => "balance-check",
            EventKind::UserList => "user-list",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account entry inside a `user-list` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub name: String,
    pub balance: Decimal,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            name: account.name.to_string(),
            balance: account.balance.value(),
        }
    }
}

/// Ledger events. Serialized payloads are camelCase with decimals as strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum LedgerEvent {
    AccountCreated {
        account_id: AccountId,
        name: String,
        balance: Decimal,
    },

    Deposit {
        account_id: AccountId,
        amount: Decimal,
    },

    Withdrawal {
        account_id: AccountId,
        amount: Decimal,
    },

    BalanceCheck {
        account_id: AccountId,
        balance: Decimal,
    },

    UserList {
        users: Vec<AccountSummary>,
        total: usize,
        truncated: bool,
    },
}

impl LedgerEvent {
    pub fn account_created(account: &Account) -> Self {
        LedgerEvent::AccountCreated {
            account_id: account.id,
            name: account.name.to_string(),
            balance: account.balance.value(),
        }
    }

    pub fn deposit(account_id: AccountId, amount: &Amount) -> Self {
        LedgerEvent::Deposit {
            account_id,
            amount: amount.value(),
        }
    }

    pub fn withdrawal(account_id: AccountId, amount: &Amount) -> Self {
        LedgerEvent::Withdrawal {
            account_id,
            amount: amount.value(),
        }
    }

    pub fn balance_check(account_id: AccountId, balance: &Balance) -> Self {
        LedgerEvent::BalanceCheck {
            account_id,
            balance: balance.value(),
        }
    }

    /// Build a `user-list` event holding at most `limit` accounts.
    /// Accounts are expected in ascending id order.
    pub fn user_list(accounts: &[Account], limit: usize) -> Self {
        let users: Vec<AccountSummary> = accounts
            .iter()
            .take(limit)
            .map(AccountSummary::from)
            .collect();

        LedgerEvent::UserList {
            truncated: users.len() < accounts.len(),
            total: accounts.len(),
            users,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::AccountCreated { .. } => EventKind::AccountCreated,
            LedgerEvent::Deposit { .. } => EventKind::Deposit,
            LedgerEvent::Withdrawal { .. } => EventKind::Withdrawal,
            LedgerEvent::BalanceCheck { .. } => EventKind::BalanceCheck,
            LedgerEvent::UserList { .. } => EventKind::UserList,
        }
    }

    /// Account the event is about, used as the broker message key
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            LedgerEvent::AccountCreated { account_id, .. }
            | LedgerEvent::Deposit { account_id, .. }
            | LedgerEvent::Withdrawal { account_id, .. }
            | LedgerEvent::BalanceCheck { account_id, .. } => Some(*account_id),
            LedgerEvent::UserList { .. } => None,
        }
    }
}

/// Wire envelope: the event fields plus identity and timestamp for
/// consumer-side deduplication.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<'a> {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: &'a LedgerEvent,
}

impl<'a> EventEnvelope<'a> {
    pub fn new(event: &'a LedgerEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountName;
    use rust_decimal_macros::dec;

    fn account(id: i64, name: &str, balance: Decimal) -> Account {
        Account::new(
            AccountId::new(id),
            AccountName::new(name).unwrap(),
            Balance::new(balance).unwrap(),
        )
    }

    #[test]
    fn test_deposit_payload_shape() {
        let event = LedgerEvent::deposit(AccountId::new(1), &Amount::new(dec!(100)).unwrap());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["accountId"], 1);
        assert_eq!(json["amount"], "100");
        assert_eq!(event.kind(), EventKind::Deposit);
    }

    #[test]
    fn test_account_created_payload_shape() {
        let event = LedgerEvent::account_created(&account(3, "Alice", dec!(0)));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["accountId"], 3);
        assert_eq!(json["name"], "Alice");
        assert_eq!(json["balance"], "0");
    }

    #[test]
    fn test_envelope_flattens_event() {
        let event = LedgerEvent::balance_check(
            AccountId::new(9),
            &Balance::new(dec!(20)).unwrap(),
        );
        let json = serde_json::to_value(EventEnvelope::new(&event)).unwrap();

        assert!(json["eventId"].is_string());
        assert!(json["occurredAt"].is_string());
        assert_eq!(json["accountId"], 9);
        assert_eq!(json["balance"], "20");
    }

    #[test]
    fn test_user_list_is_capped() {
        let accounts: Vec<Account> = (1..=5)
            .map(|i| account(i, &format!("user{i}"), dec!(1)))
            .collect();

        match LedgerEvent::user_list(&accounts, 3) {
            LedgerEvent::UserList { users, total, truncated } => {
                assert_eq!(users.len(), 3);
                assert_eq!(users[0].id, AccountId::new(1));
                assert_eq!(total, 5);
                assert!(truncated);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        match LedgerEvent::user_list(&accounts, 10) {
            LedgerEvent::UserList { truncated, .. } => assert!(!truncated),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_user_list_has_no_key() {
        assert_eq!(LedgerEvent::user_list(&[], 10).account_id(), None);
        assert_eq!(LedgerEvent::user_list(&[], 10).kind(), EventKind::UserList);
    }
}
