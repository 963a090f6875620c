use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

// ── Template structure (stored as JSONB) ────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormStructure {
    #[serde(default)]
    pub sections: Vec<FormSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    /// text | number | scale | boolean | choice
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation: ValidationRules,
    /// Semantic tag used by alert rules, e.g. `pain_score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multiple: bool,
    /// Answers that raise an alert when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_values: Option<Vec<Value>>,
}

// ── Conversational flow ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStep {
    pub index: usize,
    pub section_id: String,
    pub section_title: String,
    pub question_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub validation: ValidationRules,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationalFlow {
    pub template_id: Uuid,
    pub title: String,
    pub total_steps: usize,
    pub steps: Vec<FlowStep>,
}

impl ConversationalFlow {
    pub fn step(&self, question_id: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.question_id == question_id)
    }
}

// ── Rows ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "form_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FormStatus {
    NotStarted,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FormTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub structure: Json<FormStructure>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PatientFormInstance {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_id: Uuid,
    pub form_template_id: Uuid,
    pub task_id: Option<Uuid>,
    pub status: FormStatus,
    pub completion_percentage: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub rule: String,
    pub severity: AlertSeverity,
    pub question_id: String,
    pub message: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub patient_form_id: Uuid,
    pub question_id: String,
    pub response_value: Json<Value>,
    pub response_type: String,
    pub response_method: String,
    pub time_to_respond_ms: Option<i64>,
    pub alerts: Json<Vec<Alert>>,
    pub responded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A form instance surfaced for a protocol day.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolForm {
    pub instance_id: Uuid,
    pub form_template_id: Uuid,
    pub title: String,
    pub task_id: Uuid,
    pub due_date: NaiveDate,
    pub day_offset: i32,
    pub status: FormStatus,
    pub completion_percentage: i32,
}

// ── Requests / responses ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFormTemplateRequest {
    pub title: String,
    pub description: Option<String>,
    pub structure: FormStructure,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFormInstanceRequest {
    pub patient_id: Uuid,
    pub form_template_id: Uuid,
    pub task_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseRequest {
    pub patient_form_id: Uuid,
    #[serde(flatten)]
    pub answer: AnswerInput,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    pub question_id: String,
    #[serde(default)]
    pub response: Value,
    pub response_type: Option<String>,
    pub response_method: Option<String>,
    /// Milliseconds between prompt and answer.
    pub time_to_respond: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchRequest {
    pub patient_form_id: Uuid,
    pub responses: Vec<AnswerInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    pub completion_percentage: i32,
    pub status: FormStatus,
    pub answered: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub success: bool,
    pub response_id: Uuid,
    pub alerts: Vec<Alert>,
    pub completion_status: CompletionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub question_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
    pub alerts: Vec<Alert>,
    pub completion_status: CompletionStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolFormsQuery {
    pub patient_id: Uuid,
    pub day: i32,
    pub protocol_id: Option<Uuid>,
}
