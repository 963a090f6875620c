use axum::{extract::{Query, State}, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::auth::TenantContext,
    routes::require_admin,
    AppState,
};

#[derive(Deserialize)]
pub struct AuditQuery {
    pub page:   Option<i64>,
    pub limit:  Option<i64>,
    pub action: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogRow {
    pub id:            Uuid,
    pub tenant_id:     Option<Uuid>,
    pub user_id:       Option<Uuid>,
    pub action:        String,
    pub resource_type: Option<String>,
    pub resource_id:   Option<String>,
    pub metadata:      Value,
    pub created_at:    DateTime<Utc>,
}

/// GET /audit-log: newest first, optionally filtered by action prefix.
pub async fn list_audit_log(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(params): Query<AuditQuery>,
) -> AppResult<Json<Value>> {
    require_admin(&ctx)?;

    let limit  = params.limit.unwrap_or(50).clamp(1, 200);
    let page   = params.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;
    let prefix = params.action.as_deref().map(|a| format!("{}%", a.trim()));

    let mut rows_qb = ctx.scope.select(
        "SELECT id, tenant_id, user_id, action, resource_type, resource_id, metadata, created_at
         FROM audit_log",
        "tenant_id",
    );
    let mut count_qb = ctx.scope.select("SELECT COUNT(*)::BIGINT FROM audit_log", "tenant_id");
    if let Some(prefix) = &prefix {
        rows_qb.push(" AND action LIKE ");
        rows_qb.push_bind(prefix.clone());
        count_qb.push(" AND action LIKE ");
        count_qb.push_bind(prefix.clone());
    }
    rows_qb.push(" ORDER BY created_at DESC LIMIT ");
    rows_qb.push_bind(limit);
    rows_qb.push(" OFFSET ");
    rows_qb.push_bind(offset);

    let entries = rows_qb.build_query_as::<AuditLogRow>().fetch_all(&state.db).await?;
    let total: i64 = count_qb.build_query_scalar().fetch_one(&state.db).await?;

    Ok(Json(json!({
        "entries": entries,
        "total":   total,
        "page":    page,
        "limit":   limit,
    })))
}
