//! Runs pending schema migrations against the database.
//!
//! Migrations are embedded at compile time, so no migration files are needed
//! at runtime.

use anyhow::Result;
use flowcore_common::Config;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowcore=info")),
        )
        .init();

    let config = Config::from_env()?;

    info!("Running database migrations");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;

    flowcore_runtime::MIGRATOR.run(&pool).await?;

    info!("Migrations completed");
    Ok(())
}
