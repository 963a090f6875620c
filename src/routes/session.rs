use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    db::tenant::TenantScope,
    error::AppResult,
    models::{
        auth::{AuthenticatedUser, TenantContext},
        profile::UserRole,
    },
    services::{
        audit::{self, AuditEntry},
        patients::PatientService,
        profiles::ProfileService,
        recovery, role_router,
    },
    AppState,
};

/// POST /session/bootstrap: reconcile the caller's records and tell the
/// client where to land.
pub async fn bootstrap(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let reconciled = ProfileService::reconcile(&state.db, &user, state.config.default_tenant_id).await?;

    if reconciled.created_profile || reconciled.created_patient {
        audit::log(
            state.db.clone(),
            AuditEntry::new("session.reconciled", user.user_id, reconciled.profile.tenant_id)
                .resource("profile", reconciled.profile.id)
                .metadata(json!({
                    "createdProfile": reconciled.created_profile,
                    "createdPatient": reconciled.created_patient,
                })),
        );
    }

    let role = reconciled.profile.role();
    let recovery = reconciled
        .patient
        .as_ref()
        .map(|p| recovery::classify(p.surgery_date, recovery::today()));
    let redirect = role_router::route(&role, recovery);

    Ok(Json(json!({
        "profile": reconciled.profile,
        "patient": reconciled.patient,
        "createdProfile": reconciled.created_profile,
        "createdPatient": reconciled.created_patient,
        "recovery": recovery,
        "redirect": redirect,
    })))
}

/// GET /session/route
pub async fn landing_route(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> AppResult<Json<Value>> {
    let recovery = if ctx.role == UserRole::Patient {
        PatientService::new(state.db.clone(), TenantScope::Scoped(ctx.home_tenant))
            .find_for_profile(ctx.user_id)
            .await?
            .map(|p| recovery::classify(p.surgery_date, recovery::today()))
    } else {
        None
    };

    Ok(Json(json!({
        "role": ctx.role,
        "recovery": recovery,
        "redirect": role_router::route(&ctx.role, recovery),
    })))
}
