use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        auth::TenantContext,
        protocol::{
            AssignProtocolRequest, AssignProtocolResponse, CreateProtocolRequest, PatientProtocol,
            Protocol, ProtocolWithTasks,
        },
    },
    routes::require_staff,
    services::{
        assignment::AssignmentService,
        audit::{self, AuditEntry},
        protocols::ProtocolStore,
    },
    AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_protocols(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(params): Query<ProtocolListQuery>,
) -> AppResult<Json<Vec<Protocol>>> {
    require_staff(&ctx)?;
    let protocols = ProtocolStore::new(state.db.clone(), ctx.scope)
        .list(params.include_inactive)
        .await?;
    Ok(Json(protocols))
}

pub async fn get_protocol(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ProtocolWithTasks>> {
    require_staff(&ctx)?;
    let protocol = ProtocolStore::new(state.db.clone(), ctx.scope).get_with_tasks(id).await?;
    Ok(Json(protocol))
}

pub async fn create_protocol(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<CreateProtocolRequest>,
) -> AppResult<(StatusCode, Json<ProtocolWithTasks>)> {
    require_staff(&ctx)?;
    let created = ProtocolStore::new(state.db.clone(), ctx.scope)
        .create(&body, Some(ctx.user_id))
        .await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new("protocol.created", ctx.user_id, Some(created.protocol.tenant_id))
            .resource("protocol", created.protocol.id)
            .metadata(json!({ "name": created.protocol.name, "tasks": created.tasks.len() })),
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /protocols/assign
pub async fn assign_protocol(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<AssignProtocolRequest>,
) -> AppResult<(StatusCode, Json<AssignProtocolResponse>)> {
    require_staff(&ctx)?;
    let result = AssignmentService::new(state.db.clone(), ctx.scope)
        .assign(&body, Some(ctx.user_id))
        .await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new("protocol.assigned", ctx.user_id, ctx.scope.tenant_id())
            .resource("patient_protocol", result.assignment_id)
            .metadata(json!({
                "protocolId": body.protocol_id,
                "patientId": body.patient_id,
                "startDate": result.start_date,
                "tasksCreated": result.tasks_created,
            })),
    );
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /protocols/assignments/{id}/complete
pub async fn complete_assignment(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PatientProtocol>> {
    require_staff(&ctx)?;
    let assignment = AssignmentService::new(state.db.clone(), ctx.scope).complete(id).await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new("protocol.assignment_completed", ctx.user_id, Some(assignment.tenant_id))
            .resource("patient_protocol", assignment.id),
    );
    Ok(Json(assignment))
}
