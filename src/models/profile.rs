use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    Surgeon,
    Nurse,
    PhysicalTherapist,
    Provider,
    Admin,
    PracticeAdmin,
    SaasAdmin,
    SuperAdmin,
    /// Any role string this build does not know about.
    #[serde(other)]
    Unknown,
}

impl UserRole {
    pub const ALL: [UserRole; 10] = [
        UserRole::Patient,
        UserRole::Surgeon,
        UserRole::Nurse,
        UserRole::PhysicalTherapist,
        UserRole::Provider,
        UserRole::Admin,
        UserRole::PracticeAdmin,
        UserRole::SaasAdmin,
        UserRole::SuperAdmin,
        UserRole::Unknown,
    ];

    /// Lenient parse used for stored values: never fails.
    pub fn from_db(s: &str) -> Self {
        s.parse().unwrap_or(UserRole::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Patient => "patient",
            UserRole::Surgeon => "surgeon",
            UserRole::Nurse => "nurse",
            UserRole::PhysicalTherapist => "physical_therapist",
            UserRole::Provider => "provider",
            UserRole::Admin => "admin",
            UserRole::PracticeAdmin => "practice_admin",
            UserRole::SaasAdmin => "saas_admin",
            UserRole::SuperAdmin => "super_admin",
            UserRole::Unknown => "unknown",
        }
    }

    /// May act across tenants (honors the tenant override header).
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserRole::SuperAdmin | UserRole::SaasAdmin)
    }

    pub fn is_clinical(&self) -> bool {
        matches!(
            self,
            UserRole::Surgeon | UserRole::Nurse | UserRole::PhysicalTherapist | UserRole::Provider
        )
    }

    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            UserRole::Admin | UserRole::PracticeAdmin | UserRole::SaasAdmin | UserRole::SuperAdmin
        )
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(UserRole::Patient),
            "surgeon" => Ok(UserRole::Surgeon),
            "nurse" => Ok(UserRole::Nurse),
            "physical_therapist" => Ok(UserRole::PhysicalTherapist),
            "provider" => Ok(UserRole::Provider),
            "admin" => Ok(UserRole::Admin),
            "practice_admin" => Ok(UserRole::PracticeAdmin),
            "saas_admin" => Ok(UserRole::SaasAdmin),
            "super_admin" => Ok(UserRole::SuperAdmin),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// DB row struct. Role is TEXT so roles added later still load.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: Option<String>,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn role(&self) -> UserRole {
        UserRole::from_db(&self.role)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_roles_through_text() {
        for role in UserRole::ALL.iter().filter(|r| **r != UserRole::Unknown) {
            assert_eq!(&UserRole::from_db(role.as_str()), role);
        }
    }

    #[test]
    fn unknown_role_strings_do_not_fail() {
        assert_eq!(UserRole::from_db("billing_clerk"), UserRole::Unknown);
        let parsed: UserRole = serde_json::from_str("\"billing_clerk\"").unwrap();
        assert_eq!(parsed, UserRole::Unknown);
    }

    #[test]
    fn only_super_and_saas_admin_are_privileged() {
        let privileged: Vec<_> = UserRole::ALL.iter().filter(|r| r.is_privileged()).collect();
        assert_eq!(privileged, vec![&UserRole::SaasAdmin, &UserRole::SuperAdmin]);
    }
}
