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
        profile::{Profile, UpdateRoleRequest, UserRole},
    },
    routes::require_admin,
    services::{
        audit::{self, AuditEntry},
        profiles::ProfileService,
    },
    AppState,
};

/// PUT /profiles/{id}/role
pub async fn update_role(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRoleRequest>,
) -> AppResult<Json<Profile>> {
    require_admin(&ctx)?;

    let role: UserRole = body
        .role
        .trim()
        .parse()
        .map_err(|e: anyhow::Error| AppError::Validation(e.to_string()))?;
    if role.is_privileged() && !ctx.role.is_privileged() {
        return Err(AppError::Forbidden("Only platform administrators may grant platform roles"));
    }
    if id == ctx.user_id && role != ctx.role {
        return Err(AppError::Forbidden("Administrators cannot change their own role"));
    }

    let profile = ProfileService::update_role(&state.db, ctx.scope, id, &role).await?;
    tracing::info!(profile_id = %id, %role, by = %ctx.user_id, "role updated");
    audit::log(
        state.db.clone(),
        AuditEntry::new("profile.role_updated", ctx.user_id, profile.tenant_id)
            .resource("profile", profile.id)
            .metadata(json!({ "role": role.as_str() })),
    );
    Ok(Json(profile))
}
