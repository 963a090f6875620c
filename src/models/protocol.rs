use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::patient::SurgeryType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "task_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Form,
    Exercise,
    Education,
    Walking,
    Medication,
}

impl std::str::FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "form" => Ok(TaskType::Form),
            "exercise" => Ok(TaskType::Exercise),
            "education" => Ok(TaskType::Education),
            "walking" => Ok(TaskType::Walking),
            "medication" => Ok(TaskType::Medication),
            other => Err(anyhow::anyhow!("Unknown task type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "assignment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub surgery_type: Option<SurgeryType>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One task definition of a protocol template, relative to surgery day.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolTask {
    pub id: Uuid,
    pub protocol_id: Uuid,
    pub tenant_id: Uuid,
    /// Negative = pre-op, 0 = surgery day.
    pub day_offset: i32,
    pub task_type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    pub sort_order: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolWithTasks {
    #[serde(flatten)]
    pub protocol: Protocol,
    pub tasks: Vec<ProtocolTask>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProtocolTask {
    pub day_offset: i32,
    pub task_type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProtocolRequest {
    pub name: String,
    pub description: Option<String>,
    pub surgery_type: Option<SurgeryType>,
    #[serde(default)]
    pub tasks: Vec<NewProtocolTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientProtocol {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub protocol_id: Uuid,
    pub status: AssignmentStatus,
    pub start_date: NaiveDate,
    pub assigned_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignProtocolRequest {
    pub protocol_id: Uuid,
    pub patient_id: Uuid,
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignProtocolResponse {
    pub assignment_id: Uuid,
    pub tasks_created: usize,
    pub start_date: NaiveDate,
}
