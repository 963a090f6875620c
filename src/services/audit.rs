use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// An audit log entry to record.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id:       Option<Uuid>,
    pub tenant_id:     Option<Uuid>,
    pub action:        String,
    pub resource_type: Option<String>,
    pub resource_id:   Option<String>,
    pub metadata:      Value,
}

impl AuditEntry {
    pub fn new(action: &str, user_id: Uuid, tenant_id: Option<Uuid>) -> Self {
        Self {
            user_id: Some(user_id),
            tenant_id,
            action: action.to_string(),
            resource_type: None,
            resource_id: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn resource(mut self, kind: &str, id: impl ToString) -> Self {
        self.resource_type = Some(kind.to_string());
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Fire-and-forget audit log entry.
/// Spawns a background task: never blocks the request handler and never
/// propagates errors (logs a warning on failure).
pub fn log(pool: PgPool, entry: AuditEntry) {
    tokio::spawn(async move {
        let res = sqlx::query(
            "INSERT INTO audit_log
                (tenant_id, user_id, action, resource_type, resource_id, metadata)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(sqlx::types::Json(&entry.metadata))
        .execute(&pool)
        .await;

        if let Err(e) = res {
            tracing::warn!(action = %entry.action, "audit log insert failed: {e}");
        }
    });
}
