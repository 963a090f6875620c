use crate::models::profile::UserRole;
use crate::services::recovery::{Phase, Recovery};

pub const PATIENT_PRE_OP: &str = "/patient/pre-op";
pub const PATIENT_POST_OP: &str = "/patient/post-op";
pub const ADMIN_DASHBOARD: &str = "/admin/dashboard";
pub const PROVIDER_PATIENTS: &str = "/provider/patients";
pub const PRACTICE_DASHBOARD: &str = "/practice/dashboard";
pub const GENERIC_DASHBOARD: &str = "/dashboard";

/// Landing path for a role. Total: roles nobody planned for land on the
/// generic dashboard. Patients without a known recovery state go pre-op.
pub fn route(role: &UserRole, recovery: Option<Recovery>) -> &'static str {
    match role {
        UserRole::Patient => match recovery.map(|r| r.phase) {
            Some(Phase::PostOp) => PATIENT_POST_OP,
            Some(Phase::PreOp) | None => PATIENT_PRE_OP,
        },
        UserRole::Admin | UserRole::SuperAdmin | UserRole::SaasAdmin => ADMIN_DASHBOARD,
        UserRole::Surgeon | UserRole::Nurse | UserRole::PhysicalTherapist | UserRole::Provider => {
            PROVIDER_PATIENTS
        }
        UserRole::PracticeAdmin => PRACTICE_DASHBOARD,
        UserRole::Unknown => GENERIC_DASHBOARD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::recovery::classify;
    use chrono::NaiveDate;

    #[test]
    fn every_role_has_a_landing_path() {
        for role in UserRole::ALL.iter() {
            let path = route(role, None);
            assert!(path.starts_with('/'), "{role} -> {path}");
        }
    }

    #[test]
    fn routing_is_idempotent() {
        for role in UserRole::ALL.iter() {
            assert_eq!(route(role, None), route(role, None));
        }
    }

    #[test]
    fn clinical_roles_land_on_patient_list() {
        for role in [UserRole::Surgeon, UserRole::Nurse, UserRole::PhysicalTherapist, UserRole::Provider] {
            assert_eq!(route(&role, None), PROVIDER_PATIENTS);
        }
    }

    #[test]
    fn patient_route_follows_recovery_phase() {
        let surgery = NaiveDate::from_ymd_opt(2025, 1, 10);
        let before = classify(surgery, NaiveDate::from_ymd_opt(2025, 1, 9).unwrap());
        let on_day = classify(surgery, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        assert_eq!(route(&UserRole::Patient, Some(before)), PATIENT_PRE_OP);
        assert_eq!(route(&UserRole::Patient, Some(on_day)), PATIENT_POST_OP);
        assert_eq!(route(&UserRole::Patient, None), PATIENT_PRE_OP);
    }

    #[test]
    fn unknown_role_gets_generic_dashboard() {
        assert_eq!(route(&UserRole::from_db("billing_clerk"), None), GENERIC_DASHBOARD);
        assert_eq!(route(&UserRole::PracticeAdmin, None), PRACTICE_DASHBOARD);
    }
}
