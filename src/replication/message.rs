//! Inbound replication messages
//!
//! Wire shape is `{"action": "...", "data": {...}}`. Only known actions
//! become a [`ReplicationAction`]; everything else is classified so the
//! listener can log and move on.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::{AccountName, Balance};

pub const CREATE_ACCOUNT: &str = "create-account";

/// Account to mirror into the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredAccount {
    pub name: AccountName,
    pub balance: Balance,
    /// Stable identifier assigned by the upstream system, if it sends one
    pub external_id: Option<String>,
}

/// Closed set of actions the listener applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationAction {
    CreateAccount(MirroredAccount),
}

/// Why a record was not turned into an action
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Valid JSON without an `action` field, e.g. our own outbound events
    #[error("record carries no action")]
    NoAction,

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct Envelope {
    action: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountData {
    #[serde(alias = "acNm")]
    name: String,
    #[serde(default)]
    balance: Option<Decimal>,
    #[serde(default, alias = "external_id")]
    external_id: Option<String>,
}

impl ReplicationAction {
    pub fn parse(payload: &[u8]) -> Result<Self, MessageError> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(|e| MessageError::Malformed(e.to_string()))?;

        match envelope.action.as_deref() {
            None => Err(MessageError::NoAction),
            Some(CREATE_ACCOUNT) => {
                let data: CreateAccountData = serde_json::from_value(envelope.data)
                    .map_err(|e| MessageError::Malformed(e.to_string()))?;
                Ok(ReplicationAction::CreateAccount(mirrored_account(data)?))
            }
            Some(other) => Err(MessageError::UnknownAction(other.to_string())),
        }
    }
}

fn mirrored_account(data: CreateAccountData) -> Result<MirroredAccount, MessageError> {
    let name = AccountName::new(&data.name).map_err(|e| MessageError::Malformed(e.to_string()))?;
    let balance = Balance::new(data.balance.unwrap_or(Decimal::ZERO))
        .map_err(|e| MessageError::Malformed(e.to_string()))?;
    let external_id = data
        .external_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    Ok(MirroredAccount {
        name,
        balance,
        external_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mirrored(payload: &str) -> MirroredAccount {
        match ReplicationAction::parse(payload.as_bytes()).unwrap() {
            ReplicationAction::CreateAccount(account) => account,
        }
    }

    #[test]
    fn test_parse_legacy_field_names() {
        let account = mirrored(r#"{"action":"create-account","data":{"acNm":"Dana","balance":250}}"#);
        assert_eq!(account.name.as_str(), "Dana");
        assert_eq!(account.balance.value(), dec!(250));
        assert_eq!(account.external_id, None);
    }

    #[test]
    fn test_parse_with_external_id_and_string_balance() {
        let account = mirrored(
            r#"{"action":"create-account","data":{"name":"Eve","balance":"10.25","externalId":"crm-7"}}"#,
        );
        assert_eq!(account.balance.value(), dec!(10.25));
        assert_eq!(account.external_id.as_deref(), Some("crm-7"));
    }

    #[test]
    fn test_missing_balance_defaults_to_zero() {
        let account = mirrored(r#"{"action":"create-account","data":{"name":"Finn"}}"#);
        assert_eq!(account.balance, Balance::zero());
    }

    #[test]
    fn test_records_without_action_are_classified() {
        let err = ReplicationAction::parse(br#"{"accountId":1,"name":"Alice","balance":"0"}"#)
            .unwrap_err();
        assert_eq!(err, MessageError::NoAction);
    }

    #[test]
    fn test_unknown_action() {
        let err = ReplicationAction::parse(br#"{"action":"close-account","data":{}}"#).unwrap_err();
        assert_eq!(err, MessageError::UnknownAction("close-account".to_string()));
    }

    #[test]
    fn test_invalid_data_is_malformed() {
        for payload in [
            r#"not json"#,
            r#"{"action":"create-account","data":{"name":"   "}}"#,
            r#"{"action":"create-account","data":{"name":"Gus","balance":-5}}"#,
            r#"{"action":"create-account"}"#,
        ] {
            assert!(
                matches!(
                    ReplicationAction::parse(payload.as_bytes()),
                    Err(MessageError::Malformed(_))
                ),
                "expected malformed: {}",
                payload
            );
        }
    }
}
