use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Store connection settings, read from flags or the environment.
#[derive(Debug, Args)]
pub struct StoreConfig {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    /// Upper bound on pooled connections
    #[arg(long, env = "RISK_ENGINE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}

impl StoreConfig {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections.max(1))
            .connect(&self.database_url)
            .await
            .context("failed to connect to Postgres")
    }
}
