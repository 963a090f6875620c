use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::{AppError, AppResult},
    models::protocol::{
        AssignProtocolRequest, AssignProtocolResponse, PatientProtocol, ProtocolTask, TaskType,
    },
    services::{metrics, patients::PatientService, protocols::ProtocolStore, recovery},
};

/// A task definition placed on the calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub protocol_task_id: Uuid,
    pub task_type: TaskType,
    pub title: String,
    pub content_ref: Option<String>,
    pub day_offset: i32,
    pub due_date: NaiveDate,
}

impl PlannedTask {
    /// Form template to instantiate alongside the task, if any.
    pub fn form_template_id(&self) -> Option<Uuid> {
        match self.task_type {
            TaskType::Form => self.content_ref.as_deref().and_then(|r| r.trim().parse().ok()),
            _ => None,
        }
    }
}

/// Day the timeline hangs off: explicit start, else surgery day, else today.
pub fn resolve_anchor(
    start_date: Option<NaiveDate>,
    surgery_date: Option<NaiveDate>,
    today: NaiveDate,
) -> NaiveDate {
    start_date.or(surgery_date).unwrap_or(today)
}

/// Materialize task definitions against an anchor date, keeping their order.
/// A due date outside the calendar range is a broken protocol, not a panic.
pub fn build_timeline(definitions: &[ProtocolTask], anchor: NaiveDate) -> AppResult<Vec<PlannedTask>> {
    definitions
        .iter()
        .map(|def| {
            let due_date = anchor
                .checked_add_signed(Duration::days(i64::from(def.day_offset)))
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "Task \"{}\" has day offset {} which falls outside the calendar",
                        def.title, def.day_offset
                    ))
                })?;
            Ok(PlannedTask {
                protocol_task_id: def.id,
                task_type: def.task_type,
                title: def.title.clone(),
                content_ref: def.content_ref.clone(),
                day_offset: def.day_offset,
                due_date,
            })
        })
        .collect()
}

pub struct AssignmentService {
    pool: PgPool,
    scope: TenantScope,
}

impl AssignmentService {
    pub fn new(pool: PgPool, scope: TenantScope) -> Self {
        Self { pool, scope }
    }

    pub async fn active_assignment(&self, patient_id: Uuid) -> AppResult<Option<PatientProtocol>> {
        let mut qb = self.scope.select("SELECT * FROM patient_protocols", "tenant_id");
        qb.push(" AND patient_id = ");
        qb.push_bind(patient_id);
        qb.push(" AND status = 'active'");
        Ok(qb.build_query_as::<PatientProtocol>().fetch_optional(&self.pool).await?)
    }

    /// Apply a protocol to a patient and write its dated task rows.
    ///
    /// A patient holds at most one active assignment; a second one is
    /// rejected with `Conflict` (the partial unique index catches concurrent
    /// callers that slip past the check). All rows go in one transaction.
    pub async fn assign(
        &self,
        req: &AssignProtocolRequest,
        assigned_by: Option<Uuid>,
    ) -> AppResult<AssignProtocolResponse> {
        let store = ProtocolStore::new(self.pool.clone(), self.scope);
        let protocol = store.get(req.protocol_id).await?;
        if !protocol.is_active {
            return Err(AppError::Validation("Protocol is not active".into()));
        }

        let patient = PatientService::new(self.pool.clone(), self.scope)
            .get(req.patient_id)
            .await?;
        if protocol.tenant_id != patient.tenant_id {
            return Err(AppError::Forbidden("Protocol and patient belong to different tenants"));
        }
        let tenant_id = patient.tenant_id;

        if self.active_assignment(patient.id).await?.is_some() {
            return Err(active_conflict());
        }

        let definitions = store.tasks(protocol.id).await?;
        let start_date = resolve_anchor(req.start_date, patient.surgery_date, recovery::today());
        let planned = build_timeline(&definitions, start_date)?;

        let mut tx = self.pool.begin().await?;
        TenantScope::Scoped(tenant_id).bind_session(&mut tx).await?;

        let assignment_id: Uuid = sqlx::query_scalar(
            "INSERT INTO patient_protocols (tenant_id, patient_id, protocol_id, start_date, assigned_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(tenant_id)
        .bind(patient.id)
        .bind(protocol.id)
        .bind(start_date)
        .bind(assigned_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| assignment_insert_error(AppError::from(e)))?;

        let mut inserted = 0usize;
        for task in &planned {
            let task_id: Uuid = sqlx::query_scalar(
                "INSERT INTO patient_tasks
                    (tenant_id, assignment_id, patient_id, protocol_task_id, task_type,
                     title, content_ref, day_offset, due_date)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING id",
            )
            .bind(tenant_id)
            .bind(assignment_id)
            .bind(patient.id)
            .bind(task.protocol_task_id)
            .bind(task.task_type)
            .bind(&task.title)
            .bind(&task.content_ref)
            .bind(task.day_offset)
            .bind(task.due_date)
            .fetch_one(&mut *tx)
            .await
            .map_err(|source| AppError::AssignmentFailed { inserted_before_failure: inserted, source })?;

            if let Some(template_id) = task.form_template_id() {
                let linked = sqlx::query(
                    "INSERT INTO patient_form_instances (tenant_id, patient_id, form_template_id, task_id)
                     SELECT $1, $2, id, $4 FROM form_templates WHERE id = $3 AND tenant_id = $1",
                )
                .bind(tenant_id)
                .bind(patient.id)
                .bind(template_id)
                .bind(task_id)
                .execute(&mut *tx)
                .await
                .map_err(|source| AppError::AssignmentFailed { inserted_before_failure: inserted, source })?
                .rows_affected();
                if linked == 0 {
                    tracing::warn!(
                        %task_id,
                        %template_id,
                        protocol_task_id = %task.protocol_task_id,
                        "form task references a template missing from this tenant; no form instance created"
                    );
                }
            }

            inserted += 1;
        }

        tx.commit()
            .await
            .map_err(|source| AppError::AssignmentFailed { inserted_before_failure: inserted, source })?;

        let tenant_label = tenant_id.to_string();
        metrics::ASSIGNMENTS_COUNTER.with_label_values(&[&tenant_label]).inc();
        metrics::TASKS_CREATED_COUNTER
            .with_label_values(&[&tenant_label])
            .inc_by(inserted as f64);
        tracing::info!(
            %assignment_id,
            protocol_id = %protocol.id,
            patient_id = %patient.id,
            %start_date,
            tasks_created = inserted,
            "protocol assigned"
        );

        Ok(AssignProtocolResponse {
            assignment_id,
            tasks_created: inserted,
            start_date,
        })
    }

    pub async fn complete(&self, assignment_id: Uuid) -> AppResult<PatientProtocol> {
        let mut qb = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "UPDATE patient_protocols SET status = 'completed', completed_at = NOW() WHERE ",
        );
        self.scope.push_tenant_clause(&mut qb, "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(assignment_id);
        qb.push(" AND status = 'active' RETURNING *");

        qb.build_query_as::<PatientProtocol>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Active assignment"))
    }
}

/// The partial unique index on active assignments surfaces as a unique
/// violation; report it the same way as the up-front check.
fn assignment_insert_error(err: AppError) -> AppError {
    match err {
        AppError::Conflict(_) => active_conflict(),
        other => other,
    }
}

fn active_conflict() -> AppError {
    AppError::Conflict("Patient already has an active protocol assignment".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn def(offset: i32, task_type: TaskType, content_ref: Option<&str>) -> ProtocolTask {
        ProtocolTask {
            id: Uuid::new_v4(),
            protocol_id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            day_offset: offset,
            task_type,
            title: format!("day {offset}"),
            description: None,
            content_ref: content_ref.map(str::to_string),
            sort_order: 0,
        }
    }

    #[test]
    fn offsets_become_due_dates_in_order() {
        let defs = vec![
            def(-5, TaskType::Education, None),
            def(0, TaskType::Medication, None),
            def(7, TaskType::Walking, None),
        ];
        let timeline = build_timeline(&defs, d(2025, 1, 10)).unwrap();
        let dates: Vec<_> = timeline.iter().map(|t| t.due_date).collect();
        assert_eq!(dates, vec![d(2025, 1, 5), d(2025, 1, 10), d(2025, 1, 17)]);
        assert_eq!(timeline.len(), 3);
    }

    #[test]
    fn due_dates_cross_month_and_leap_boundaries() {
        let defs = vec![def(-1, TaskType::Form, None), def(1, TaskType::Form, None)];
        let timeline = build_timeline(&defs, d(2024, 3, 1)).unwrap();
        assert_eq!(timeline[0].due_date, d(2024, 2, 29));
        assert_eq!(timeline[1].due_date, d(2024, 3, 2));
    }

    #[test]
    fn anchor_prefers_start_then_surgery_then_today() {
        let today = d(2025, 6, 1);
        assert_eq!(resolve_anchor(Some(d(2025, 1, 1)), Some(d(2025, 2, 2)), today), d(2025, 1, 1));
        assert_eq!(resolve_anchor(None, Some(d(2025, 2, 2)), today), d(2025, 2, 2));
        assert_eq!(resolve_anchor(None, None, today), today);
    }

    #[test]
    fn only_form_tasks_with_template_ids_spawn_instances() {
        let template = Uuid::new_v4().to_string();
        let defs = vec![
            def(0, TaskType::Form, Some(&template)),
            def(0, TaskType::Form, Some("pain-diary-v1")),
            def(0, TaskType::Exercise, Some(&template)),
        ];
        let timeline = build_timeline(&defs, d(2025, 1, 1)).unwrap();
        assert_eq!(timeline[0].form_template_id(), Some(template.parse().unwrap()));
        assert_eq!(timeline[1].form_template_id(), None);
        assert_eq!(timeline[2].form_template_id(), None);
    }

    #[test]
    fn offsets_past_the_calendar_are_rejected_not_panicking() {
        for offset in [i32::MAX, i32::MIN] {
            let defs = vec![def(0, TaskType::Walking, None), def(offset, TaskType::Walking, None)];
            let err = build_timeline(&defs, d(2025, 1, 10)).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{offset}");
        }
    }

    #[test]
    fn unique_violation_on_insert_reports_active_assignment() {
        let err = assignment_insert_error(AppError::Conflict("Resource already exists".into()));
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.public_message(), active_conflict().public_message());

        let err = assignment_insert_error(AppError::Upstream("connection reset".into()));
        assert!(matches!(err, AppError::Upstream(_)));
    }
}
