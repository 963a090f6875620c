use sqlx::PgPool;
use tracing::{info, warn};

use crate::db::tenant::TenantScope;
use crate::services::{recovery, tasks::TaskService};

/// Spawn a background task that flags overdue tasks every `interval_secs`.
/// Runs elevated: it is a system job spanning every tenant.
pub fn start(pool: PgPool, interval_secs: u64) {
    tokio::spawn(async move {
        let service = TaskService::new(pool, TenantScope::Elevated);
        loop {
            match service.mark_overdue(recovery::today()).await {
                Ok(0) => {}
                Ok(n) => info!("Task scheduler: flagged {n} task(s) overdue"),
                Err(e) => warn!("Task scheduler: overdue sweep failed: {e}"),
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs.max(60))).await;
        }
    });
}
