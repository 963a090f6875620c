//! Import a protocol template from a CSV file into one tenant.
//!
//! Usage: import-protocol --tenant UUID --name NAME [--surgery-type TKA] FILE.csv
//!
//! CSV columns (header row required):
//!   day_offset,task_type,title,description,content_ref,sort_order
//! `description`, `content_ref` and `sort_order` may be left empty.

use std::{fs::File, io::Read, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use recovery_api::{
    db::tenant::{tenant_exists, TenantScope},
    models::{
        patient::SurgeryType,
        protocol::{CreateProtocolRequest, NewProtocolTask, TaskType},
    },
    services::protocols::{offset_in_range, ProtocolStore, MAX_DAY_OFFSET},
};

#[derive(Parser)]
#[command(name = "import-protocol", about = "Import a recovery protocol from CSV")]
struct Args {
    /// Tenant that will own the protocol
    #[arg(long)]
    tenant: Uuid,
    /// Protocol name
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    /// TKA, THA, TSA or other
    #[arg(long)]
    surgery_type: Option<SurgeryType>,
    /// Parse and validate only; write nothing
    #[arg(long)]
    dry_run: bool,
    file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Row {
    day_offset: i32,
    task_type: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content_ref: Option<String>,
    #[serde(default)]
    sort_order: Option<i32>,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_rows<R: Read>(reader: R) -> Result<Vec<NewProtocolTask>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut tasks = Vec::new();
    for (i, record) in rdr.deserialize::<Row>().enumerate() {
        let line = i + 2;
        let row = record.with_context(|| format!("line {line}: malformed row"))?;
        if !offset_in_range(row.day_offset) {
            anyhow::bail!("line {line}: day_offset {} outside ±{MAX_DAY_OFFSET}", row.day_offset);
        }
        let task_type: TaskType = row
            .task_type
            .parse()
            .with_context(|| format!("line {line}: bad task_type"))?;
        tasks.push(NewProtocolTask {
            day_offset: row.day_offset,
            task_type,
            title: row.title,
            description: non_empty(row.description),
            content_ref: non_empty(row.content_ref),
            sort_order: row.sort_order,
        });
    }
    Ok(tasks)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let file = File::open(&args.file).with_context(|| format!("cannot open {:?}", args.file))?;
    let tasks = parse_rows(file)?;
    tracing::info!("Parsed {} task definition(s) from {:?}", tasks.len(), args.file);

    if args.dry_run {
        for t in &tasks {
            println!("day {:>4}  {:<10?}  {}", t.day_offset, t.task_type, t.title);
        }
        return Ok(());
    }

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    if !tenant_exists(&pool, args.tenant).await? {
        anyhow::bail!("tenant {} does not exist", args.tenant);
    }

    let req = CreateProtocolRequest {
        name: args.name,
        description: args.description,
        surgery_type: args.surgery_type,
        tasks,
    };
    let created = ProtocolStore::new(pool, TenantScope::Scoped(args.tenant))
        .create(&req, None)
        .await?;

    println!(
        "Imported protocol {} ({}) with {} task(s)",
        created.protocol.name,
        created.protocol.id,
        created.tasks.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rows_with_optional_columns() {
        let csv = "day_offset,task_type,title,description,content_ref,sort_order\n\
                   -7,education,Pre-op class,,,\n\
                   0, form ,Pain diary,Daily check,3f2b8e0a-1c1d-4c1e-9a3e-2b6f1c0d9e11,1\n\
                   14,walking,Walk 10 minutes,,,\n";
        let tasks = parse_rows(csv.as_bytes()).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].day_offset, -7);
        assert_eq!(tasks[0].description, None);
        assert_eq!(tasks[1].task_type, TaskType::Form);
        assert_eq!(tasks[1].sort_order, Some(1));
        assert!(tasks[1].content_ref.is_some());
    }

    #[test]
    fn reports_line_of_bad_task_type() {
        let csv = "day_offset,task_type,title,description,content_ref,sort_order\n\
                   1,yoga,Stretch,,,\n";
        let err = parse_rows(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn rejects_out_of_range_offsets() {
        let csv = "day_offset,task_type,title,description,content_ref,sort_order\n\
                   0,walking,Walk,,,\n\
                   2147483647,walking,Walk forever,,,\n";
        let err = parse_rows(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));
    }
}
