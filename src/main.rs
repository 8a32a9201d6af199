use std::sync::Arc;

use agent_metrics_backend::{
    config::Config,
    db::{
        postgres_lead_metrics_repository::PostgresLeadMetricsRepository,
        postgres_usage_repository::PostgresUsageRepository,
    },
    routes::api_router,
    services::n8n::{N8nApi, N8nClient},
    utils::cache::{Clock, SystemClock, TimedCache},
    AppState,
};
use anyhow::Context;
use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    let pg_pool = establish_connection(&config.database_url).await?;

    let n8n = config.n8n.as_ref().map(|settings| {
        Arc::new(N8nClient::new(&settings.api_url, &settings.api_key)) as Arc<dyn N8nApi>
    });
    if n8n.is_none() {
        warn!("N8N_API_URL / N8N_API_KEY not set; sync routes will answer 500");
    }

    let state = AppState {
        usage_repo: Arc::new(PostgresUsageRepository {
            pool: pg_pool.clone(),
        }),
        lead_repo: Arc::new(PostgresLeadMetricsRepository { pool: pg_pool }),
        n8n,
        usage_cache: Arc::new(TimedCache::new(
            config.usage_cache_ttl,
            Arc::new(SystemClock) as Arc<dyn Clock>,
        )),
        config: Arc::new(config.clone()),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .frontend_origin
                .parse::<HeaderValue>()
                .context("FRONTEND_ORIGIN is not a valid header value")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-webhook-secret"),
        ]);

    let app = api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// `RUST_LOG` filters, `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_metrics_backend=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}
