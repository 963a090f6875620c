use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::{AppError, AppResult},
    models::{
        auth::TenantContext,
        patient::{Patient, PatientFilter, PatientSummary, UpdateSurgeryRequest},
        profile::UserRole,
    },
};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

pub struct PatientService {
    pool: PgPool,
    scope: TenantScope,
}

impl PatientService {
    pub fn new(pool: PgPool, scope: TenantScope) -> Self {
        Self { pool, scope }
    }

    /// Build the provider patient-list query. The tenant clause always comes
    /// first and every caller-supplied value is a bind parameter.
    pub fn list_query(&self, filter: &PatientFilter) -> QueryBuilder<'static, Postgres> {
        let mut qb = self.scope.select(
            "SELECT p.id, p.tenant_id, p.mrn, pr.first_name, pr.last_name,
                    p.surgery_date, p.surgery_type, p.status
             FROM patients p
             JOIN profiles pr ON pr.id = p.profile_id",
            "p.tenant_id",
        );

        if let Some(tenant_id) = filter.tenant_id {
            qb.push(" AND p.tenant_id = ");
            qb.push_bind(tenant_id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND p.status = ");
            qb.push_bind(status);
        }
        if let Some(surgery_type) = filter.surgery_type {
            qb.push(" AND p.surgery_type = ");
            qb.push_bind(surgery_type);
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", escape_like(search));
            qb.push(" AND (pr.first_name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR pr.last_name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR p.mrn ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }

        let limit = filter.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
        let offset = filter.offset.unwrap_or(0).max(0);
        qb.push(" ORDER BY pr.last_name, pr.first_name LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);
        qb
    }

    pub async fn list(&self, filter: &PatientFilter) -> AppResult<Vec<PatientSummary>> {
        let mut qb = self.list_query(filter);
        let mut rows = qb.build_query_as::<PatientSummary>().fetch_all(&self.pool).await?;

        let before = rows.len();
        rows.retain(|r| self.scope.owns(r.tenant_id));
        if rows.len() != before {
            tracing::error!(dropped = before - rows.len(), "cross-tenant rows reached the patient list");
        }
        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Patient> {
        let mut qb = self.scope.select("SELECT * FROM patients", "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.build_query_as::<Patient>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Patient"))
    }

    /// Load a patient on behalf of a caller. Patients only ever see their own
    /// record; anything else looks absent.
    pub async fn get_for(&self, ctx: &TenantContext, id: Uuid) -> AppResult<Patient> {
        let patient = self.get(id).await?;
        authorize(ctx, &patient)?;
        Ok(patient)
    }

    pub async fn find_for_profile(&self, profile_id: Uuid) -> AppResult<Option<Patient>> {
        let mut qb = self.scope.select("SELECT * FROM patients", "tenant_id");
        qb.push(" AND profile_id = ");
        qb.push_bind(profile_id);
        Ok(qb.build_query_as::<Patient>().fetch_optional(&self.pool).await?)
    }

    pub async fn update_surgery(&self, id: Uuid, req: &UpdateSurgeryRequest) -> AppResult<Patient> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE patients SET surgery_date = COALESCE(");
        qb.push_bind(req.surgery_date);
        qb.push(", surgery_date), surgery_type = COALESCE(");
        qb.push_bind(req.surgery_type);
        qb.push(", surgery_type), status = COALESCE(");
        qb.push_bind(req.status);
        qb.push(", status), updated_at = NOW() WHERE ");
        self.scope.push_tenant_clause(&mut qb, "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.push(" RETURNING *");

        qb.build_query_as::<Patient>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Patient"))
    }
}

/// Staff see every patient in scope; patients see themselves.
pub fn authorize(ctx: &TenantContext, patient: &Patient) -> AppResult<()> {
    if ctx.is_staff() {
        return Ok(());
    }
    match ctx.role {
        UserRole::Patient if patient.profile_id == ctx.user_id => Ok(()),
        UserRole::Patient => Err(AppError::NotFound("Patient")),
        _ => Err(AppError::Forbidden("Insufficient role")),
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::patient::{PatientStatus, SurgeryType};
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;

    fn service(scope: TenantScope) -> PatientService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/recovery_test")
            .unwrap();
        PatientService::new(pool, scope)
    }

    #[tokio::test]
    async fn crafted_filters_cannot_drop_tenant_clause() {
        let svc = service(TenantScope::Scoped(Uuid::new_v4()));
        let filter = PatientFilter {
            tenant_id: Some(Uuid::new_v4()),
            search: Some("x' OR '1'='1' --".into()),
            ..Default::default()
        };
        let qb = svc.list_query(&filter);
        let sql = qb.sql();

        assert!(sql.contains("WHERE p.tenant_id = $1 AND p.tenant_id = $2"));
        assert!(!sql.contains("'1'='1'"));
        assert!(!sql.contains(" OR '"));
    }

    #[tokio::test]
    async fn filters_are_bound_in_order() {
        let svc = service(TenantScope::Scoped(Uuid::new_v4()));
        let filter = PatientFilter {
            status: Some(PatientStatus::Active),
            surgery_type: Some(SurgeryType::Tka),
            search: Some("smith".into()),
            limit: Some(10_000),
            ..Default::default()
        };
        let qb = svc.list_query(&filter);
        let sql = qb.sql();
        assert!(sql.contains("p.status = $2"));
        assert!(sql.contains("p.surgery_type = $3"));
        assert!(sql.contains("pr.first_name ILIKE $4"));
        assert!(sql.ends_with("LIMIT $7 OFFSET $8"));
    }

    #[tokio::test]
    async fn elevated_scope_honors_tenant_filter_only() {
        let svc = service(TenantScope::Elevated);
        let filter = PatientFilter { tenant_id: Some(Uuid::new_v4()), ..Default::default() };
        let qb = svc.list_query(&filter);
        assert!(qb.sql().contains("WHERE TRUE AND p.tenant_id = $1"));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    fn patient(profile_id: Uuid) -> Patient {
        Patient {
            id: Uuid::new_v4(),
            profile_id,
            tenant_id: Uuid::new_v4(),
            mrn: "MRN-1".into(),
            surgery_date: None,
            surgery_type: SurgeryType::Tha,
            status: PatientStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ctx(role: UserRole, user_id: Uuid) -> TenantContext {
        let tenant = Uuid::new_v4();
        TenantContext { user_id, home_tenant: tenant, role, scope: TenantScope::Scoped(tenant) }
    }

    #[test]
    fn patients_only_reach_their_own_record() {
        let me = Uuid::new_v4();
        assert!(authorize(&ctx(UserRole::Patient, me), &patient(me)).is_ok());
        let err = authorize(&ctx(UserRole::Patient, me), &patient(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(authorize(&ctx(UserRole::Nurse, me), &patient(Uuid::new_v4())).is_ok());
        assert!(authorize(&ctx(UserRole::Unknown, me), &patient(me)).is_err());
    }
}
