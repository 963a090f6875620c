use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::profile::UserRole;
use crate::db::tenant::TenantScope;

/// Claims embedded in the identity provider's access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // auth user UUID
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<Value>,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
}

/// Authenticated principal, straight from a validated token. Carries no
/// tenant information; see `TenantContext` for that.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub metadata: Value,
}

impl AuthenticatedUser {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Caller identity resolved against its profile.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub user_id: Uuid,
    /// Tenant of the caller's own profile.
    pub home_tenant: Uuid,
    pub role: UserRole,
    /// Effective scope for this request (home tenant, override, or elevated).
    pub scope: TenantScope,
}

impl TenantContext {
    pub fn is_staff(&self) -> bool {
        self.role.is_clinical() || self.role.is_admin()
    }
}
