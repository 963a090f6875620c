use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        auth::TenantContext,
        patient::{Patient, PatientFilter, PatientSummary, UpdateSurgeryRequest},
        task::{PatientTask, TaskFilter},
    },
    routes::require_staff,
    services::{
        audit::{self, AuditEntry},
        patients::PatientService,
        recovery,
        tasks::TaskService,
    },
    AppState,
};

pub async fn list_patients(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(filter): Query<PatientFilter>,
) -> AppResult<Json<Vec<PatientSummary>>> {
    require_staff(&ctx)?;
    let patients = PatientService::new(state.db.clone(), ctx.scope).list(&filter).await?;
    Ok(Json(patients))
}

pub async fn get_patient(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Patient>> {
    let patient = PatientService::new(state.db.clone(), ctx.scope).get_for(&ctx, id).await?;
    Ok(Json(patient))
}

pub async fn update_surgery(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSurgeryRequest>,
) -> AppResult<Json<Patient>> {
    require_staff(&ctx)?;
    let patient = PatientService::new(state.db.clone(), ctx.scope)
        .update_surgery(id, &body)
        .await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new("patient.surgery_updated", ctx.user_id, Some(patient.tenant_id))
            .resource("patient", patient.id)
            .metadata(json!({
                "surgeryDate": patient.surgery_date,
                "surgeryType": patient.surgery_type,
                "status": patient.status,
            })),
    );
    Ok(Json(patient))
}

/// GET /patients/{id}/recovery
pub async fn get_recovery(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let patient = PatientService::new(state.db.clone(), ctx.scope).get_for(&ctx, id).await?;
    let today = recovery::today();
    let r = recovery::classify(patient.surgery_date, today);
    Ok(Json(json!({
        "patientId": patient.id,
        "surgeryDate": patient.surgery_date,
        "today": today,
        "phase": r.phase,
        "day": r.day,
    })))
}

pub async fn list_tasks(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Query(filter): Query<TaskFilter>,
) -> AppResult<Json<Vec<PatientTask>>> {
    let patient = PatientService::new(state.db.clone(), ctx.scope).get_for(&ctx, id).await?;
    let tasks = TaskService::new(state.db.clone(), ctx.scope)
        .list_for_patient(patient.id, &filter)
        .await?;
    Ok(Json(tasks))
}
