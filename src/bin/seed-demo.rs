//! Demo tenant seed script
//!
//! Creates a fresh demo clinic with:
//! - 3 profiles: 1 admin, 1 surgeon, 1 patient (identity subjects are random UUIDs)
//! - a patient three days after a total knee arthroplasty
//! - a daily check-in form template with a tagged pain scale
//! - a TKA protocol mixing form, exercise, walking and education tasks
//! - an active assignment, so the task timeline is populated
//!
//! Usage:
//!   DATABASE_URL=... ./seed-demo [--name "Demo Orthopedics"]
//!
//! Each run creates a new tenant; nothing existing is touched.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use recovery_api::{
    db::tenant::TenantScope,
    models::{
        form::{CreateFormTemplateRequest, FormSection, FormStructure, Question, ValidationRules},
        protocol::{AssignProtocolRequest, CreateProtocolRequest, NewProtocolTask, TaskType},
        patient::SurgeryType,
    },
    services::{
        assignment::AssignmentService, forms::extraction::FormExtractionService,
        protocols::ProtocolStore,
    },
};

#[derive(Parser)]
#[command(name = "seed-demo", about = "Seed a demo clinic tenant")]
struct Args {
    #[arg(long, default_value = "Demo Orthopedics")]
    name: String,
}

async fn insert_profile(
    pool: &PgPool,
    tenant_id: Uuid,
    role: &str,
    first: &str,
    last: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let email = format!("{}.{}@demo.example", first.to_lowercase(), last.to_lowercase());
    sqlx::query(
        "INSERT INTO profiles (id, tenant_id, email, role, first_name, last_name)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(tenant_id)
    .bind(&email)
    .bind(role)
    .bind(first)
    .bind(last)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to insert {role} profile"))?;
    println!("  {role:<8} {first} {last} <{email}>  sub={id}");
    Ok(id)
}

fn question(id: &str, text: &str, kind: &str, order: i32, validation: ValidationRules) -> Question {
    Question {
        id: id.into(),
        text: text.into(),
        kind: kind.into(),
        order,
        required: true,
        validation,
        tag: None,
    }
}

fn check_in_form() -> FormStructure {
    let mut pain = question(
        "pain",
        "On a scale of 0 to 10, how bad is your pain right now?",
        "scale",
        1,
        ValidationRules { min: Some(0.0), max: Some(10.0), ..Default::default() },
    );
    pain.tag = Some("pain_score".into());

    let mut fever = question("fever", "Have you had a fever above 38°C?", "boolean", 1, ValidationRules::default());
    fever.validation.alert_values = Some(vec![serde_json::json!(true)]);

    FormStructure {
        sections: vec![
            FormSection {
                id: "symptoms".into(),
                title: "Symptoms".into(),
                order: 1,
                questions: vec![
                    pain,
                    question(
                        "swelling",
                        "How is the swelling around your knee?",
                        "choice",
                        2,
                        ValidationRules {
                            options: Some(vec!["none".into(), "mild".into(), "moderate".into(), "severe".into()]),
                            ..Default::default()
                        },
                    ),
                ],
            },
            FormSection {
                id: "wound".into(),
                title: "Wound".into(),
                order: 2,
                questions: vec![
                    fever,
                    question(
                        "notes",
                        "Anything else your care team should know?",
                        "text",
                        2,
                        ValidationRules { max_length: Some(1000), ..Default::default() },
                    ),
                ],
            },
        ],
    }
}

fn task(day_offset: i32, task_type: TaskType, title: &str, content_ref: Option<String>) -> NewProtocolTask {
    NewProtocolTask {
        day_offset,
        task_type,
        title: title.into(),
        description: None,
        content_ref,
        sort_order: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;

    println!("=== Seed Demo Tenant ===");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("Failed to connect to database")?;

    // 1. Tenant and people
    let tenant_id: Uuid = sqlx::query_scalar("INSERT INTO tenants (name) VALUES ($1) RETURNING id")
        .bind(&args.name)
        .fetch_one(&pool)
        .await
        .context("Failed to create tenant")?;
    println!("Tenant: {} ({tenant_id})", args.name);
    let scope = TenantScope::Scoped(tenant_id);

    println!("Profiles:");
    insert_profile(&pool, tenant_id, "admin", "Alex", "Morgan").await?;
    let surgeon_id = insert_profile(&pool, tenant_id, "surgeon", "Sam", "Okafor").await?;
    let patient_profile = insert_profile(&pool, tenant_id, "patient", "Jordan", "Lee").await?;

    let surgery_date = Utc::now().date_naive() - Duration::days(3);
    let patient_id: Uuid = sqlx::query_scalar(
        "INSERT INTO patients (profile_id, tenant_id, mrn, surgery_date, surgery_type)
         VALUES ($1, $2, 'DEMO-0001', $3, $4)
         RETURNING id",
    )
    .bind(patient_profile)
    .bind(tenant_id)
    .bind(surgery_date)
    .bind(SurgeryType::Tka)
    .fetch_one(&pool)
    .await
    .context("Failed to create patient")?;
    println!("Patient: {patient_id} (surgery {surgery_date})");

    // 2. Daily check-in form
    let template = FormExtractionService::new(pool.clone(), scope)
        .create_template(&CreateFormTemplateRequest {
            title: "Daily check-in".into(),
            description: Some("Pain, swelling and wound questions".into()),
            structure: check_in_form(),
        })
        .await?;
    println!("Form template: {}", template.id);

    // 3. Protocol
    let form_ref = Some(template.id.to_string());
    let mut tasks = vec![
        task(-7, TaskType::Education, "Watch: preparing your home for surgery", None),
        task(-1, TaskType::Medication, "Stop blood thinners as instructed", None),
    ];
    for day in 0..=14 {
        tasks.push(task(day, TaskType::Form, "Daily check-in", form_ref.clone()));
    }
    for day in [1, 3, 7, 10, 14] {
        tasks.push(task(day, TaskType::Exercise, "Quad sets and ankle pumps", None));
    }
    tasks.push(task(2, TaskType::Walking, "Walk 5 minutes with a walker", None));
    tasks.push(task(7, TaskType::Walking, "Walk 10 minutes", None));
    tasks.push(task(14, TaskType::Education, "Read: when to call your surgeon", None));

    let protocol = ProtocolStore::new(pool.clone(), scope)
        .create(
            &CreateProtocolRequest {
                name: "TKA standard recovery".into(),
                description: Some("Two-week post-operative plan for total knee arthroplasty".into()),
                surgery_type: Some(SurgeryType::Tka),
                tasks,
            },
            Some(surgeon_id),
        )
        .await?;
    println!(
        "Protocol: {} ({} task definitions)",
        protocol.protocol.id,
        protocol.tasks.len()
    );

    // 4. Assignment
    let assigned = AssignmentService::new(pool.clone(), scope)
        .assign(
            &AssignProtocolRequest {
                protocol_id: protocol.protocol.id,
                patient_id,
                start_date: Some(surgery_date),
            },
            Some(surgeon_id),
        )
        .await?;
    println!(
        "Assignment: {} ({} tasks from {})",
        assigned.assignment_id, assigned.tasks_created, assigned.start_date
    );

    println!("Done.");
    Ok(())
}
