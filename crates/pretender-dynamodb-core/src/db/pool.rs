//! Pool construction and migration runner for the Postgres-backed item store.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Ordered schema migrations, applied once at startup. Each is idempotent
/// (`CREATE TABLE IF NOT EXISTS`), so re-running them against an
/// already-migrated database is a no-op.
const MIGRATIONS: &[&str] = &[
    include_str!("../../migrations/0001_tables.sql"),
    include_str!("../../migrations/0002_items.sql"),
    include_str!("../../migrations/0003_gsi_projections.sql"),
    include_str!("../../migrations/0004_stream_records.sql"),
    include_str!("../../migrations/0005_stream_identity.sql"),
];

/// Create a connection pool against `database_url`.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to the Postgres backend")
}

/// Apply every migration in order.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for migration in MIGRATIONS {
        sqlx::raw_sql(migration)
            .execute(pool)
            .await
            .context("failed to apply schema migration")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires a database connection.
    async fn test_should_connect_and_migrate() {
        let pool = create_pool("postgres://localhost:5432/pretenderdb_test", 5)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
