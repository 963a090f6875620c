//! Create missing Patient records for patient-role profiles.
//!
//! Profiles created before the session bootstrap existed, or whose sign-up
//! failed half way, have no Patient row. Run once after deploys that touch
//! sign-up, or whenever `/session/bootstrap` logs reconciliation warnings.
//!
//! Usage: backfill-patients [--tenant UUID] [--dry-run]

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use recovery_api::services::profiles::ProfileService;

#[derive(Parser)]
#[command(name = "backfill-patients", about = "Create missing patient records")]
struct Args {
    /// Limit to one tenant (all tenants if omitted)
    #[arg(long)]
    tenant: Option<Uuid>,
    /// List affected profiles without writing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    let orphans: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT p.id, p.tenant_id
         FROM profiles p
         LEFT JOIN patients pt ON pt.profile_id = p.id
         WHERE p.role = 'patient'
           AND p.tenant_id IS NOT NULL
           AND pt.id IS NULL
           AND ($1::uuid IS NULL OR p.tenant_id = $1)
         ORDER BY p.created_at",
    )
    .bind(args.tenant)
    .fetch_all(&pool)
    .await?;

    tracing::info!("Found {} patient profile(s) without a patient record", orphans.len());

    let mut created = 0usize;
    for (profile_id, tenant_id) in orphans {
        if args.dry_run {
            println!("{profile_id}  tenant {tenant_id}");
            continue;
        }
        match ProfileService::create_patient(&pool, profile_id, tenant_id, None).await {
            Ok(patient) => {
                created += 1;
                tracing::info!(%profile_id, mrn = %patient.mrn, "patient record created");
            }
            Err(e) => tracing::error!(%profile_id, "backfill failed: {e}"),
        }
    }

    if !args.dry_run {
        tracing::info!("Backfill complete: {created} patient record(s) created");
    }
    Ok(())
}
