//! Database module
//!
//! Connection checks and schema verification. The schema itself lives in
//! `migrations/` as plain SQL and is applied outside the service.

use sqlx::PgPool;

/// Tables the service reads and writes
pub const REQUIRED_TABLES: [&str; 3] = ["accounts", "ledger_outbox", "replication_checkpoints"];

/// Schema shipped with the crate
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_ledger.sql");

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(
                "Required table '{}' does not exist. Apply migrations/0001_ledger.sql first.",
                table
            );
            return Ok(false);
        }
    }

    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_outbox WHERE published_at IS NULL")
            .fetch_one(pool)
            .await?;

    if pending > 0 {
        tracing::info!(pending = pending, "Outbox has undelivered events from a previous run");
    }

    tracing::info!("Schema verified: {}", REQUIRED_TABLES.join(", "));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creates_required_tables() {
        for table in REQUIRED_TABLES {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "schema is missing {}",
                table
            );
        }
    }
}
