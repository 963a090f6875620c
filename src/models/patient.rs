use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "surgery_type")]
pub enum SurgeryType {
    #[sqlx(rename = "TKA")]
    #[serde(rename = "TKA")]
    Tka,
    #[sqlx(rename = "THA")]
    #[serde(rename = "THA")]
    Tha,
    #[sqlx(rename = "TSA")]
    #[serde(rename = "TSA")]
    Tsa,
    #[sqlx(rename = "other")]
    #[serde(rename = "other")]
    Other,
}

impl SurgeryType {
    pub fn label(&self) -> &'static str {
        match self {
            SurgeryType::Tka => "total knee arthroplasty",
            SurgeryType::Tha => "total hip arthroplasty",
            SurgeryType::Tsa => "total shoulder arthroplasty",
            SurgeryType::Other => "orthopedic surgery",
        }
    }
}

impl std::str::FromStr for SurgeryType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TKA" => Ok(SurgeryType::Tka),
            "THA" => Ok(SurgeryType::Tha),
            "TSA" => Ok(SurgeryType::Tsa),
            "OTHER" => Ok(SurgeryType::Other),
            other => Err(anyhow::anyhow!("Unknown surgery type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "patient_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PatientStatus {
    Active,
    Inactive,
    Discharged,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub tenant_id: Uuid,
    pub mrn: String,
    pub surgery_date: Option<NaiveDate>,
    pub surgery_type: SurgeryType,
    pub status: PatientStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patient joined with its profile names, for provider lists.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientSummary {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub surgery_date: Option<NaiveDate>,
    pub surgery_type: SurgeryType,
    pub status: PatientStatus,
}

/// Query-string filters for the patient list. `tenant_id` is only
/// meaningful for elevated callers; scoped callers get it AND-ed with
/// their own tenant.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientFilter {
    pub tenant_id: Option<Uuid>,
    pub status: Option<PatientStatus>,
    pub surgery_type: Option<SurgeryType>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSurgeryRequest {
    pub surgery_date: Option<NaiveDate>,
    pub surgery_type: Option<SurgeryType>,
    pub status: Option<PatientStatus>,
}
