use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Credential profile every tenant-data query is built through.
///
/// `Scoped` always contributes a bound `tenant_id = $n` clause; caller-supplied
/// filters are appended after it with `AND`, so nothing a client sends can
/// widen the result past its own tenant. `Elevated` is reserved for
/// privileged principals without a tenant override, background jobs and
/// operator binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantScope {
    Scoped(Uuid),
    Elevated,
}

impl TenantScope {
    pub fn tenant_id(&self) -> Option<Uuid> {
        match self {
            TenantScope::Scoped(id) => Some(*id),
            TenantScope::Elevated => None,
        }
    }

    /// Tenant to stamp on new rows. Elevated callers must pick a tenant first.
    pub fn require_tenant(&self) -> AppResult<Uuid> {
        self.tenant_id()
            .ok_or(AppError::Validation("An explicit tenant is required for this operation".into()))
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, TenantScope::Elevated)
    }

    /// Whether a row belonging to `tenant_id` is visible under this scope.
    pub fn owns(&self, tenant_id: Uuid) -> bool {
        match self {
            TenantScope::Scoped(id) => *id == tenant_id,
            TenantScope::Elevated => true,
        }
    }

    /// Start a query as `{base} WHERE <tenant clause>`. Append further
    /// conditions with `push(" AND ...")`.
    pub fn select<'args>(&self, base: &str, column: &str) -> QueryBuilder<'args, Postgres> {
        let mut qb = QueryBuilder::new(base);
        qb.push(" WHERE ");
        self.push_tenant_clause(&mut qb, column);
        qb
    }

    pub fn push_tenant_clause(&self, qb: &mut QueryBuilder<'_, Postgres>, column: &str) {
        match self {
            TenantScope::Scoped(id) => {
                qb.push(column);
                qb.push(" = ");
                qb.push_bind(*id);
            }
            TenantScope::Elevated => {
                qb.push("TRUE");
            }
        }
    }

    /// Pin the storage-level row policies to this scope for the rest of the
    /// current transaction.
    pub async fn bind_session(&self, conn: &mut PgConnection) -> sqlx::Result<()> {
        let value = self.tenant_id().map(|id| id.to_string()).unwrap_or_default();
        sqlx::query("SELECT set_config('app.tenant_id', $1, true)")
            .bind(value)
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub async fn tenant_exists(pool: &PgPool, tenant_id: Uuid) -> sqlx::Result<bool> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE id = $1)")
        .bind(tenant_id)
        .fetch_one(pool)
        .await
}
