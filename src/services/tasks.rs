use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::{AppError, AppResult},
    models::task::{PatientTask, TaskFilter, TaskStatus},
};

pub struct TaskService {
    pool: PgPool,
    scope: TenantScope,
}

impl TaskService {
    pub fn new(pool: PgPool, scope: TenantScope) -> Self {
        Self { pool, scope }
    }

    /// A patient's timeline, earliest due first.
    pub async fn list_for_patient(&self, patient_id: Uuid, filter: &TaskFilter) -> AppResult<Vec<PatientTask>> {
        let mut qb = self.scope.select("SELECT * FROM patient_tasks", "tenant_id");
        qb.push(" AND patient_id = ");
        qb.push_bind(patient_id);
        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status);
        }
        if let Some(from) = filter.from {
            qb.push(" AND due_date >= ");
            qb.push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND due_date <= ");
            qb.push_bind(to);
        }
        qb.push(" ORDER BY due_date, day_offset, created_at");
        Ok(qb.build_query_as::<PatientTask>().fetch_all(&self.pool).await?)
    }

    pub async fn due_on(&self, patient_id: Uuid, date: NaiveDate) -> AppResult<Vec<PatientTask>> {
        let filter = TaskFilter { status: None, from: Some(date), to: Some(date) };
        self.list_for_patient(patient_id, &filter).await
    }

    pub async fn get(&self, id: Uuid) -> AppResult<PatientTask> {
        let mut qb = self.scope.select("SELECT * FROM patient_tasks", "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.build_query_as::<PatientTask>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Task"))
    }

    /// Move a task to `status`. Entering `completed` stamps `completed_at`
    /// once; any other status clears it.
    pub async fn update_status(&self, id: Uuid, status: TaskStatus) -> AppResult<PatientTask> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE patient_tasks SET status = ");
        qb.push_bind(status);
        qb.push(", completed_at = CASE WHEN ");
        qb.push_bind(status);
        qb.push(" = 'completed' THEN COALESCE(completed_at, NOW()) ELSE NULL END WHERE ");
        self.scope.push_tenant_clause(&mut qb, "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.push(" RETURNING *");

        let task = qb
            .build_query_as::<PatientTask>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Task"))?;
        tracing::debug!(task_id = %id, ?status, "task status updated");
        Ok(task)
    }

    /// Flag open tasks whose due date has passed. Returns the number flagged.
    pub async fn mark_overdue(&self, today: NaiveDate) -> AppResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "UPDATE patient_tasks SET status = 'overdue' WHERE ",
        );
        self.scope.push_tenant_clause(&mut qb, "tenant_id");
        qb.push(" AND status IN ('pending', 'in_progress') AND due_date < ");
        qb.push_bind(today);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Statuses a patient may set on their own tasks.
pub fn patient_may_set(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::InProgress | TaskStatus::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patients_cannot_flag_overdue_or_reset() {
        assert!(patient_may_set(TaskStatus::Completed));
        assert!(patient_may_set(TaskStatus::InProgress));
        assert!(!patient_may_set(TaskStatus::Overdue));
        assert!(!patient_may_set(TaskStatus::Pending));
    }
}
