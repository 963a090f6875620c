use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

lazy_static! {
    // ── Event counters (increment on each event) ────────────────────────────
    pub static ref ASSIGNMENTS_COUNTER: CounterVec = register_counter_vec!(
        "api_protocol_assignments_total",
        "Protocol assignments by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref TASKS_CREATED_COUNTER: CounterVec = register_counter_vec!(
        "api_tasks_created_total",
        "Materialized patient tasks by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref FORM_RESPONSES_COUNTER: CounterVec = register_counter_vec!(
        "api_form_responses_total",
        "Form responses by tenant and outcome",
        &["tenant", "status"]
    ).unwrap();

    pub static ref ALERTS_COUNTER: CounterVec = register_counter_vec!(
        "api_form_alerts_total",
        "Alerts raised by form responses, by tenant and rule",
        &["tenant", "rule"]
    ).unwrap();

    pub static ref AI_REPLIES_COUNTER: CounterVec = register_counter_vec!(
        "api_ai_replies_total",
        "AI chat replies by tenant and status",
        &["tenant", "status"]
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref ACTIVE_PATIENTS_GAUGE: GaugeVec = register_gauge_vec!(
        "recovery_patients_active_total",
        "Active patients by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref OVERDUE_TASKS_GAUGE: GaugeVec = register_gauge_vec!(
        "recovery_tasks_overdue_total",
        "Overdue tasks by tenant",
        &["tenant"]
    ).unwrap();

    pub static ref TENANTS_GAUGE: Gauge = register_gauge!(
        "recovery_tenants_total",
        "Number of tenants"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        if let Err(e) = collect(&pool).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let tenants: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM tenants")
        .fetch_one(pool)
        .await?;
    TENANTS_GAUGE.set(tenants as f64);

    let patients: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT tenant_id, COUNT(*)::BIGINT FROM patients WHERE status = 'active' GROUP BY tenant_id",
    )
    .fetch_all(pool)
    .await?;
    for (tenant, count) in patients {
        ACTIVE_PATIENTS_GAUGE
            .with_label_values(&[&tenant.to_string()])
            .set(count as f64);
    }

    let overdue: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT tenant_id, COUNT(*)::BIGINT FROM patient_tasks WHERE status = 'overdue' GROUP BY tenant_id",
    )
    .fetch_all(pool)
    .await?;
    for (tenant, count) in overdue {
        OVERDUE_TASKS_GAUGE
            .with_label_values(&[&tenant.to_string()])
            .set(count as f64);
    }

    info!("Metrics: collected for {} tenant(s)", tenants);
    Ok(())
}
