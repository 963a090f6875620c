use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::{tenant_exists, TenantScope},
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        patient::Patient,
        profile::{Profile, UserRole},
    },
};

const MRN_ATTEMPTS: usize = 3;

/// Outcome of reconciling an authenticated principal with its records.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    pub profile: Profile,
    pub patient: Option<Patient>,
    pub created_profile: bool,
    pub created_patient: bool,
}

pub struct ProfileService;

impl ProfileService {
    pub async fn find(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<Profile>> {
        sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Make sure the principal has a Profile and, for patients, a Patient row.
    ///
    /// Missing records mean an earlier sign-up step failed. They are created
    /// with placeholder data and logged as warnings. The role of a created
    /// profile is always `patient`, whatever the token metadata claims.
    pub async fn reconcile(
        pool: &PgPool,
        user: &AuthenticatedUser,
        default_tenant: Option<Uuid>,
    ) -> AppResult<Reconciled> {
        let (profile, created_profile) = match Self::find(pool, user.user_id).await? {
            Some(p) => (p, false),
            None => (Self::create_profile(pool, user, default_tenant).await?, true),
        };

        let tenant_id = profile.tenant_id.ok_or(AppError::TenantNotFound)?;

        let (patient, created_patient) = if profile.role() == UserRole::Patient {
            let existing = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE profile_id = $1")
                .bind(profile.id)
                .fetch_optional(pool)
                .await?;
            match existing {
                Some(p) => (Some(p), false),
                None => {
                    let surgery_date = user
                        .metadata_str("surgery_date")
                        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
                    let p = Self::create_patient(pool, profile.id, tenant_id, surgery_date).await?;
                    (Some(p), true)
                }
            }
        } else {
            (None, false)
        };

        Ok(Reconciled {
            profile,
            patient,
            created_profile,
            created_patient,
        })
    }

    async fn create_profile(
        pool: &PgPool,
        user: &AuthenticatedUser,
        default_tenant: Option<Uuid>,
    ) -> AppResult<Profile> {
        let tenant_id = user
            .metadata_str("tenant_id")
            .and_then(|s| s.parse::<Uuid>().ok())
            .or(default_tenant)
            .ok_or(AppError::TenantNotFound)?;

        if !tenant_exists(pool, tenant_id).await? {
            return Err(AppError::TenantNotFound);
        }

        let (first_name, last_name) = placeholder_names(user);
        tracing::warn!(
            user_id = %user.user_id,
            %tenant_id,
            "profile missing for authenticated user; creating placeholder"
        );

        // A concurrent bootstrap may have won the race; keep its row.
        sqlx::query(
            "INSERT INTO profiles (id, tenant_id, email, role, first_name, last_name)
             VALUES ($1, $2, $3, 'patient', $4, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(user.user_id)
        .bind(tenant_id)
        .bind(&user.email)
        .bind(&first_name)
        .bind(&last_name)
        .execute(pool)
        .await?;

        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
            .bind(user.user_id)
            .fetch_one(pool)
            .await?;
        Ok(profile)
    }

    pub async fn create_patient(
        pool: &PgPool,
        profile_id: Uuid,
        tenant_id: Uuid,
        surgery_date: Option<NaiveDate>,
    ) -> AppResult<Patient> {
        tracing::warn!(%profile_id, %tenant_id, "patient record missing for patient profile; creating");

        for _ in 0..MRN_ATTEMPTS {
            let mrn = generate_mrn();
            sqlx::query(
                "INSERT INTO patients (profile_id, tenant_id, mrn, surgery_date)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT DO NOTHING",
            )
            .bind(profile_id)
            .bind(tenant_id)
            .bind(&mrn)
            .bind(surgery_date)
            .execute(pool)
            .await?;

            let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE profile_id = $1")
                .bind(profile_id)
                .fetch_optional(pool)
                .await?;
            if let Some(p) = patient {
                return Ok(p);
            }
            // MRN collided within the tenant; draw another.
        }

        Err(AppError::Conflict("Could not allocate a unique MRN".into()))
    }

    pub async fn update_role(
        pool: &PgPool,
        scope: TenantScope,
        profile_id: Uuid,
        role: &UserRole,
    ) -> AppResult<Profile> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE profiles SET role = ");
        qb.push_bind(role.as_str());
        qb.push(", updated_at = NOW() WHERE ");
        scope.push_tenant_clause(&mut qb, "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(profile_id);
        qb.push(" RETURNING *");

        let profile = qb
            .build_query_as::<Profile>()
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::NotFound("Profile"))?;
        Ok(profile)
    }
}

/// Names for a placeholder profile: auth metadata first, then the email's
/// local part, then fixed placeholders.
pub fn placeholder_names(user: &AuthenticatedUser) -> (String, String) {
    let full_name = user.metadata_str("full_name");
    let mut full_parts = full_name.map(|n| n.split_whitespace()).into_iter().flatten();

    let first = user
        .metadata_str("first_name")
        .map(str::to_string)
        .or_else(|| full_parts.next().map(str::to_string))
        .or_else(|| {
            user.email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown".to_string());

    let rest: Vec<&str> = full_parts.collect();
    let last = user
        .metadata_str("last_name")
        .map(str::to_string)
        .or_else(|| (!rest.is_empty()).then(|| rest.join(" ")))
        .unwrap_or_else(|| "User".to_string());

    (first, last)
}

fn generate_mrn() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..100_000_000);
    format!("MRN-{n:08}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(email: Option<&str>, metadata: serde_json::Value) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: email.map(str::to_string),
            metadata,
        }
    }

    #[test]
    fn names_from_explicit_metadata() {
        let u = user(Some("x@y.z"), json!({ "first_name": "Grace", "last_name": "Hopper" }));
        assert_eq!(placeholder_names(&u), ("Grace".into(), "Hopper".into()));
    }

    #[test]
    fn names_from_full_name() {
        let u = user(None, json!({ "full_name": "Mary Ann Evans" }));
        assert_eq!(placeholder_names(&u), ("Mary".into(), "Ann Evans".into()));
    }

    #[test]
    fn names_fall_back_to_email_then_placeholders() {
        let u = user(Some("jdoe@clinic.org"), serde_json::Value::Null);
        assert_eq!(placeholder_names(&u), ("jdoe".into(), "User".into()));

        let u = user(None, json!({ "first_name": "   " }));
        assert_eq!(placeholder_names(&u), ("Unknown".into(), "User".into()));
    }

    #[test]
    fn mrn_has_fixed_shape() {
        let mrn = generate_mrn();
        assert_eq!(mrn.len(), 12);
        assert!(mrn.starts_with("MRN-"));
        assert!(mrn[4..].chars().all(|c| c.is_ascii_digit()));
    }
}
