//! Runs one N8N usage sync against the configured instance and store, then
//! prints the report as JSON.
//!
//! Usage: `sync_n8n_usage [lookback_days] [--debug]`

use agent_metrics_backend::{
    config::Config,
    db::postgres_usage_repository::PostgresUsageRepository,
    engine::{SyncOptions, UsageSync},
    services::n8n::N8nClient,
};
use anyhow::{anyhow, Context};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agent_metrics_backend=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    let settings = config
        .n8n
        .as_ref()
        .ok_or_else(|| anyhow!("N8N_API_URL and N8N_API_KEY must be set"))?;

    let mut options = SyncOptions {
        lookback_days: config.sync_lookback_days,
        limit: config.sync_execution_limit,
        source: "cli".to_string(),
        ..SyncOptions::default()
    };
    for arg in std::env::args().skip(1) {
        if arg == "--debug" {
            options.debug = true;
        } else {
            options.lookback_days = arg
                .parse()
                .with_context(|| format!("lookback days must be a number, got `{arg}`"))?;
        }
    }

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    let usage = PostgresUsageRepository { pool };
    let n8n = N8nClient::new(&settings.api_url, &settings.api_key);

    let report = UsageSync::new(&n8n, &usage)
        .run(&options)
        .await
        .context("usage sync failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize report")?
    );
    Ok(())
}
