use std::env;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub redis_url: Option<String>,
    /// HS256 secret shared with the identity provider that signs session tokens.
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    /// Tenant given to reconciled profiles whose auth metadata carries none.
    pub default_tenant_id: Option<Uuid>,
    // LLM (optional)
    pub llm_api_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub pain_alert_threshold: f64,
    pub overdue_sweep_secs: u64,
    /// Form submissions allowed per user per minute.
    pub submit_rate_limit: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".into())
                .parse()?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            jwt_secret: required("JWT_SECRET")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            default_tenant_id: match env::var("DEFAULT_TENANT_ID").ok().filter(|s| !s.is_empty()) {
                Some(v) => Some(v.parse()?),
                None => None,
            },
            llm_api_url: env::var("LLM_API_URL").ok().filter(|s| !s.is_empty()),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|s| !s.is_empty()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()?,
            pain_alert_threshold: env::var("PAIN_ALERT_THRESHOLD")
                .unwrap_or_else(|_| "7".into())
                .parse()?,
            overdue_sweep_secs: env::var("OVERDUE_SWEEP_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()?,
            submit_rate_limit: env::var("SUBMIT_RATE_LIMIT")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
        })
    }

    /// Configuration for unit tests and router tests without a live environment.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: "postgres://localhost/recovery_test".into(),
            db_max_connections: 2,
            redis_url: None,
            jwt_secret: jwt_secret.into(),
            host: "127.0.0.1".into(),
            port: 0,
            app_base_url: "http://localhost:3000".into(),
            default_tenant_id: None,
            llm_api_url: None,
            llm_api_key: None,
            llm_model: "test-model".into(),
            llm_timeout_secs: 30,
            pain_alert_threshold: 7.0,
            overdue_sweep_secs: 3600,
            submit_rate_limit: 60,
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}
