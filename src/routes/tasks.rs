use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::TenantContext,
        task::{PatientTask, UpdateTaskStatusRequest},
    },
    services::{
        audit::{self, AuditEntry},
        patients::PatientService,
        tasks::{patient_may_set, TaskService},
    },
    AppState,
};

/// PUT /tasks/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTaskStatusRequest>,
) -> AppResult<Json<PatientTask>> {
    let service = TaskService::new(state.db.clone(), ctx.scope);
    let task = service.get(id).await?;

    // Patients may only touch their own timeline.
    PatientService::new(state.db.clone(), ctx.scope)
        .get_for(&ctx, task.patient_id)
        .await?;
    if !ctx.is_staff() && !patient_may_set(body.status) {
        return Err(AppError::Forbidden("Patients may only start or complete tasks"));
    }

    let updated = service.update_status(id, body.status).await?;
    audit::log(
        state.db.clone(),
        AuditEntry::new("task.status_updated", ctx.user_id, Some(updated.tenant_id))
            .resource("patient_task", updated.id)
            .metadata(json!({ "from": task.status, "to": updated.status })),
    );
    Ok(Json(updated))
}
