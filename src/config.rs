//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::publisher::{DeliveryMode, Topics};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Bound on waiting for a row lock
    pub lock_timeout: Duration,

    /// Bound on any single statement inside a transaction
    pub statement_timeout: Duration,

    /// Outbox (default) or direct publish-before-commit
    pub event_delivery: DeliveryMode,

    pub outbox_poll_interval: Duration,

    pub outbox_batch_size: usize,

    /// Cap on accounts carried by one user-list event
    pub user_list_event_limit: usize,

    /// Broker list; `None` runs with the in-process broker
    pub kafka_brokers: Option<String>,

    pub kafka_client_id: String,

    pub kafka_group_id: String,

    /// Inbound topic mirrored by the replication listener
    pub replication_topic: String,

    /// Outbound topic names
    pub topics: Topics,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let defaults = Topics::default();
        let topics = Topics {
            new_account: text("TOPIC_NEW_ACCOUNT", &defaults.new_account),
            deposit: text("TOPIC_DEPOSIT", &defaults.deposit),
            withdrawal: text("TOPIC_WITHDRAWAL", &defaults.withdrawal),
            balance_check: text("TOPIC_BALANCE_CHECK", &defaults.balance_check),
            user_list: text("TOPIC_USER_LIST", &defaults.user_list),
        };

        Ok(Self {
            database_url,
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            host: text("HOST", "127.0.0.1"),
            port: parse(&lookup, "PORT", 3000)?,
            lock_timeout: Duration::from_millis(positive(&lookup, "LOCK_TIMEOUT_MS", 5000)?),
            statement_timeout: Duration::from_millis(positive(&lookup, "STATEMENT_TIMEOUT_MS", 30000)?),
            event_delivery: parse(&lookup, "EVENT_DELIVERY", DeliveryMode::Outbox)?,
            outbox_poll_interval: Duration::from_millis(positive(
                &lookup,
                "OUTBOX_POLL_INTERVAL_MS",
                500,
            )?),
            outbox_batch_size: positive(&lookup, "OUTBOX_BATCH_SIZE", 100)?,
            user_list_event_limit: parse(&lookup, "USER_LIST_EVENT_LIMIT", 1000)?,
            kafka_brokers: lookup("KAFKA_BROKERS").filter(|brokers| !brokers.trim().is_empty()),
            kafka_client_id: text("KAFKA_CLIENT_ID", "banking-app"),
            kafka_group_id: text("KAFKA_GROUP_ID", "kafka-group"),
            replication_topic: text("REPLICATION_TOPIC", "new-account"),
            topics,
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        None => Ok(default),
    }
}

/// Like [`parse`], but zero is rejected. A zero Postgres timeout means
/// "no limit" and a zero poll interval cannot drive a ticker.
fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialEq + Default,
{
    let value = parse(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidValue(key));
    }
    Ok(value)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = tokio_test::assert_ok!(load(&[("DATABASE_URL", "postgres://localhost/ledger")]));

        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
        assert_eq!(config.event_delivery, DeliveryMode::Outbox);
        assert_eq!(config.outbox_batch_size, 100);
        assert_eq!(config.user_list_event_limit, 1000);
        assert_eq!(config.kafka_brokers, None);
        assert_eq!(config.kafka_client_id, "banking-app");
        assert_eq!(config.kafka_group_id, "kafka-group");
        assert_eq!(config.replication_topic, "new-account");
        assert_eq!(config.topics, Topics::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/ledger"),
            ("PORT", "8080"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("EVENT_DELIVERY", "direct"),
            ("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
            ("TOPIC_DEPOSIT", "deposit-topic"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.event_delivery, DeliveryMode::Direct);
        assert_eq!(config.kafka_brokers.as_deref(), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(config.topics.deposit, "deposit-topic");
        assert_eq!(config.topics.withdrawal, "withdrawal");
    }

    #[test]
    fn test_missing_database_url() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnv("DATABASE_URL"))));
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[("DATABASE_URL", "postgres://db"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("PORT")));

        let err = load(&[("DATABASE_URL", "postgres://db"), ("EVENT_DELIVERY", "carrier-pigeon")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("EVENT_DELIVERY")));

        for key in [
            "LOCK_TIMEOUT_MS",
            "STATEMENT_TIMEOUT_MS",
            "OUTBOX_POLL_INTERVAL_MS",
            "OUTBOX_BATCH_SIZE",
        ] {
            let err = load(&[("DATABASE_URL", "postgres://db"), (key, "0")]).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue(k) if k == key),
                "{} accepted zero",
                key
            );
        }
    }
}
