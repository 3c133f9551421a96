//! Postgres schema bootstrap.

use sqlx::{Executor, PgPool};

const SCHEMA_SQL: &str = include_str!("../migrations/schema.sql");

/// Creates the pipeline tables if they do not exist yet.
pub struct PostgresSchema;

impl PostgresSchema {
    pub async fn ensure(pool: &PgPool) -> Result<(), sqlx::Error> {
        pool.execute(SCHEMA_SQL).await?;
        tracing::info!("database schema ensured");
        Ok(())
    }
}
