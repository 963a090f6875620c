// Library exports for binary tools and tests
pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use services::{forms::alerts::AlertEngine, llm::LlmClient};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// `None` disables rate limiting.
    pub redis: Option<redis::aio::MultiplexedConnection>,
    pub config: Arc<Config>,
    /// `None` disables AI chat replies.
    pub llm: Option<Arc<LlmClient>>,
    pub alerts: Arc<AlertEngine>,
}
