use std::sync::Arc;

use redis::Client as RedisClient;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recovery_api::{
    app,
    config::Config,
    db,
    services::{forms::alerts::AlertEngine, llm::LlmClient, metrics, task_scheduler},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis = match &config.redis_url {
        Some(url) => {
            let client = RedisClient::open(url.as_str())?;
            match client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    info!("Redis connected");
                    Some(conn)
                }
                Err(e) => {
                    warn!("Redis unavailable, rate limiting disabled: {e}");
                    None
                }
            }
        }
        None => {
            info!("REDIS_URL not set, rate limiting disabled");
            None
        }
    };

    let llm = match &config.llm_api_url {
        Some(url) => {
            let client = LlmClient::new(
                url,
                config.llm_api_key.clone(),
                &config.llm_model,
                config.llm_timeout_secs,
            )?;
            info!(model = %config.llm_model, "LLM client configured");
            Some(Arc::new(client))
        }
        None => {
            info!("LLM_API_URL not set, AI chat replies disabled");
            None
        }
    };

    metrics::start(pool.clone());
    task_scheduler::start(pool.clone(), config.overdue_sweep_secs);

    let state = AppState {
        db: pool,
        redis,
        config: config.clone(),
        llm,
        alerts: Arc::new(AlertEngine::with_defaults(config.pain_alert_threshold)),
    };

    let router = app::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("recovery API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
