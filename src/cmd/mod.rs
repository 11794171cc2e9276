pub mod fetch;
pub mod push;
pub mod recalc;

use crate::modules::migration::MIGRATOR;
use anyhow::{Context, Result};
use sqlx::{postgres::Postgres, Pool};
use std::env;

/// Connects to the portal database and brings the engine-owned schema up to
/// date before any command runs.
pub async fn connect_pool() -> Result<Pool<Postgres>> {
    let database_url: String = env::var("DATABASE_URL").with_context(|| {
        let message = "DATABASE_URL must be configured.";
        tracing::error!(message);
        message
    })?;

    let pool: Pool<Postgres> = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .with_context(|| {
            let message = "Failed to create database connection pool.";
            tracing::error!(message);
            message
        })?;

    MIGRATOR.run(&pool).await?;

    Ok(pool)
}
