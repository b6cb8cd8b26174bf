//! Topic routing table

use crate::domain::{EventEnvelope, EventKind, LedgerEvent};

use super::{OutboundMessage, PublishError};

/// Outbound topic name per event kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub new_account: String,
    pub deposit: String,
    pub withdrawal: String,
    pub balance_check: String,
    pub user_list: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            new_account: "new-account".to_string(),
            deposit: "deposit".to_string(),
            withdrawal: "withdrawal".to_string(),
            balance_check: "balance-check".to_string(),
            user_list: "user-list".to_string(),
        }
    }
}

impl Topics {
    pub fn topic_for(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::AccountCreated => &self.new_account,
            EventKind::Deposit => &self.deposit,
            EventKind::Withdrawal => &self.withdrawal,
            EventKind::BalanceCheck => &self.balance_check,
            EventKind::UserList => &self.user_list,
        }
    }

    /// Wrap `event` in a fresh envelope and address it
    pub fn route(&self, event: &LedgerEvent) -> Result<OutboundMessage, PublishError> {
        let envelope = EventEnvelope::new(event);
        let payload = serde_json::to_value(&envelope)?;

        Ok(OutboundMessage {
            event_id: envelope.event_id,
            topic: self.topic_for(event.kind()).to_string(),
            key: event.account_id().map(|id| id.to_string()),
            payload,
        })
    }
}
