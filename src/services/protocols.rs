use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::{AppError, AppResult},
    models::protocol::{CreateProtocolRequest, NewProtocolTask, Protocol, ProtocolTask, ProtocolWithTasks},
};

/// Tenant-scoped protocol templates and their task definitions.
pub struct ProtocolStore {
    pool: PgPool,
    scope: TenantScope,
}

impl ProtocolStore {
    pub fn new(pool: PgPool, scope: TenantScope) -> Self {
        Self { pool, scope }
    }

    pub async fn list(&self, include_inactive: bool) -> AppResult<Vec<Protocol>> {
        let mut qb = self.scope.select("SELECT * FROM protocols", "tenant_id");
        if !include_inactive {
            qb.push(" AND is_active = TRUE");
        }
        qb.push(" ORDER BY name");
        Ok(qb.build_query_as::<Protocol>().fetch_all(&self.pool).await?)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Protocol> {
        let mut qb = self.scope.select("SELECT * FROM protocols", "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.build_query_as::<Protocol>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Protocol"))
    }

    /// Task definitions ordered by day offset, then by their position within the day.
    pub async fn tasks(&self, protocol_id: Uuid) -> AppResult<Vec<ProtocolTask>> {
        let mut qb = self.scope.select("SELECT * FROM protocol_tasks", "tenant_id");
        qb.push(" AND protocol_id = ");
        qb.push_bind(protocol_id);
        qb.push(" ORDER BY day_offset, sort_order, id");
        Ok(qb.build_query_as::<ProtocolTask>().fetch_all(&self.pool).await?)
    }

    pub async fn get_with_tasks(&self, id: Uuid) -> AppResult<ProtocolWithTasks> {
        let protocol = self.get(id).await?;
        let tasks = self.tasks(id).await?;
        Ok(ProtocolWithTasks { protocol, tasks })
    }

    pub async fn create(&self, req: &CreateProtocolRequest, created_by: Option<Uuid>) -> AppResult<ProtocolWithTasks> {
        let tenant_id = self.scope.require_tenant()?;
        validate_definitions(&req.name, &req.tasks)?;

        let mut tx = self.pool.begin().await?;
        self.scope.bind_session(&mut tx).await?;

        let protocol = sqlx::query_as::<_, Protocol>(
            "INSERT INTO protocols (tenant_id, name, description, surgery_type, created_by)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(tenant_id)
        .bind(req.name.trim())
        .bind(&req.description)
        .bind(req.surgery_type)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        let mut tasks = Vec::with_capacity(req.tasks.len());
        if !req.tasks.is_empty() {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO protocol_tasks
                    (protocol_id, tenant_id, day_offset, task_type, title, description, content_ref, sort_order) ",
            );
            qb.push_values(req.tasks.iter().enumerate(), |mut b, (i, t)| {
                b.push_bind(protocol.id)
                    .push_bind(tenant_id)
                    .push_bind(t.day_offset)
                    .push_bind(t.task_type)
                    .push_bind(t.title.trim().to_string())
                    .push_bind(t.description.clone())
                    .push_bind(t.content_ref.clone())
                    .push_bind(t.sort_order.unwrap_or(i as i32));
            });
            qb.push(" RETURNING *");
            tasks = qb.build_query_as::<ProtocolTask>().fetch_all(&mut *tx).await?;
        }

        tx.commit().await?;

        tasks.sort_by_key(|t| (t.day_offset, t.sort_order));
        tracing::info!(protocol_id = %protocol.id, %tenant_id, tasks = tasks.len(), "protocol created");
        Ok(ProtocolWithTasks { protocol, tasks })
    }
}

/// Widest day offset a task definition may carry, either side of the anchor.
pub const MAX_DAY_OFFSET: i32 = 3650;

pub fn offset_in_range(day_offset: i32) -> bool {
    (-MAX_DAY_OFFSET..=MAX_DAY_OFFSET).contains(&day_offset)
}

pub fn validate_definitions(name: &str, tasks: &[NewProtocolTask]) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("Protocol name is required".into()));
    }
    if let Some(pos) = tasks.iter().position(|t| t.title.trim().is_empty()) {
        return Err(AppError::Validation(format!("Task #{} has an empty title", pos + 1)));
    }
    if let Some(pos) = tasks.iter().position(|t| !offset_in_range(t.day_offset)) {
        return Err(AppError::Validation(format!(
            "Task #{} has a day offset outside ±{MAX_DAY_OFFSET}",
            pos + 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::protocol::TaskType;

    fn def(title: &str) -> NewProtocolTask {
        NewProtocolTask {
            day_offset: 0,
            task_type: TaskType::Education,
            title: title.into(),
            description: None,
            content_ref: None,
            sort_order: None,
        }
    }

    #[test]
    fn rejects_blank_names_and_titles() {
        assert!(validate_definitions("  ", &[]).is_err());
        let err = validate_definitions("TKA standard", &[def("Ice"), def(" ")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Task #2 has an empty title");
        assert!(validate_definitions("TKA standard", &[def("Ice")]).is_ok());
    }

    #[test]
    fn rejects_offsets_beyond_ten_years() {
        let mut far = def("Far future");
        far.day_offset = i32::MAX;
        let err = validate_definitions("TKA standard", &[def("Ice"), far]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("Task #2"));

        let mut edge = def("Edge");
        edge.day_offset = -MAX_DAY_OFFSET;
        assert!(validate_definitions("TKA standard", &[edge.clone()]).is_ok());
        edge.day_offset = -MAX_DAY_OFFSET - 1;
        assert!(validate_definitions("TKA standard", &[edge.clone()]).is_err());
        edge.day_offset = i32::MIN;
        assert!(validate_definitions("TKA standard", &[edge]).is_err());
    }
}
