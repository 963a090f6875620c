use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::AppError,
    models::{
        auth::{AuthenticatedUser, TenantContext},
        profile::UserRole,
    },
    AppState,
};

pub const TENANT_OVERRIDE_HEADER: &str = "X-Tenant-ID";

/// Resolves the caller's profile into a `TenantContext`. The profile must
/// already exist; creating it is the session bootstrap's job.
impl FromRequestParts<AppState> for TenantContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        let requested = tenant_override(parts)?;

        let row: Option<(Option<Uuid>, String)> =
            sqlx::query_as("SELECT tenant_id, role FROM profiles WHERE id = $1")
                .bind(user.user_id)
                .fetch_optional(&state.db)
                .await?;

        let (tenant_id, role) = row.ok_or(AppError::Unauthorized(
            "Profile not provisioned; bootstrap the session first",
        ))?;
        let home_tenant = tenant_id.ok_or(AppError::TenantNotFound)?;
        let role = UserRole::from_db(&role);
        let scope = resolve_scope(&role, home_tenant, requested)?;

        if requested.is_some() && role.is_privileged() {
            tracing::info!(user_id = %user.user_id, ?scope, "tenant override honored");
        }

        Ok(TenantContext {
            user_id: user.user_id,
            home_tenant,
            role,
            scope,
        })
    }
}

fn tenant_override(parts: &Parts) -> Result<Option<Uuid>, AppError> {
    match parts
        .headers
        .get(TENANT_OVERRIDE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::Validation("Invalid tenant identifier".into())),
        None => Ok(None),
    }
}

/// Pick the credential profile for a request.
///
/// Privileged roles may target any tenant through the override header and
/// run elevated without it. Everyone else is pinned to their own tenant; a
/// mismatching override is rejected rather than ignored.
pub fn resolve_scope(
    role: &UserRole,
    home_tenant: Uuid,
    requested: Option<Uuid>,
) -> Result<TenantScope, AppError> {
    if role.is_privileged() {
        return Ok(match requested {
            Some(tenant) => TenantScope::Scoped(tenant),
            None => TenantScope::Elevated,
        });
    }

    match requested {
        Some(tenant) if tenant != home_tenant => Err(AppError::Forbidden("Tenant mismatch")),
        _ => Ok(TenantScope::Scoped(home_tenant)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_privileged_roles_are_pinned_to_home_tenant() {
        let home = Uuid::new_v4();
        for role in UserRole::ALL.iter().filter(|r| !r.is_privileged()) {
            assert_eq!(resolve_scope(role, home, None).unwrap(), TenantScope::Scoped(home));
            assert_eq!(resolve_scope(role, home, Some(home)).unwrap(), TenantScope::Scoped(home));
        }
    }

    #[test]
    fn non_privileged_override_to_other_tenant_is_forbidden() {
        let err = resolve_scope(&UserRole::Nurse, Uuid::new_v4(), Some(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn privileged_override_is_honored() {
        let other = Uuid::new_v4();
        let scope = resolve_scope(&UserRole::SuperAdmin, Uuid::new_v4(), Some(other)).unwrap();
        assert_eq!(scope, TenantScope::Scoped(other));
        let scope = resolve_scope(&UserRole::SaasAdmin, Uuid::new_v4(), None).unwrap();
        assert_eq!(scope, TenantScope::Elevated);
    }
}
