use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// How long an operation may wait for a pooled connection before the
/// request fails instead of queueing indefinitely.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Builds the connection pool and verifies connectivity with a ping.
    /// The schema itself is applied out of band (schema.sql).
    pub async fn new(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }
}
