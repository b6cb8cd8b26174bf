//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use ledger_engine::{InMemoryAccountStore, InMemoryBroker, Ledger};

/// Setup test database - apply the schema and truncate every table
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Unparameterized execute runs the whole script as one simple query
    pool.execute(ledger_engine::db::SCHEMA_SQL)
        .await
        .expect("Failed to apply schema");

    // Clean up DB for fresh state
    sqlx::query(
        "TRUNCATE TABLE accounts, ledger_outbox, replication_checkpoints RESTART IDENTITY",
    )
    .execute(&pool)
    .await
    .expect("Failed to clean up DB");

    pool
}

/// Ledger over the in-memory store and broker
pub fn in_memory_ledger() -> (Arc<Ledger>, InMemoryAccountStore, InMemoryBroker) {
    let store = InMemoryAccountStore::new();
    let broker = InMemoryBroker::new();
    let ledger = Arc::new(Ledger::new(
        Arc::new(store.clone()),
        Arc::new(broker.clone()),
    ));
    (ledger, store, broker)
}
