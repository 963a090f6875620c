use std::future::Future;
use std::sync::Arc;

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::{AppError, AppResult},
    models::form::{
        Alert, AnswerInput, BatchItemResult, BatchOutcome, CompletionStatus, ConversationalFlow,
        CreateFormInstanceRequest, FormResponse, FormStatus, PatientFormInstance, ProtocolForm,
        ProtocolFormsQuery, SaveOutcome, SubmitBatchRequest, SubmitResponseRequest,
    },
    services::{
        forms::{alerts::AlertEngine, extraction::FormExtractionService, validation},
        metrics,
        patients::PatientService,
        tasks::TaskService,
    },
};

/// Share of questions answered, rounded half up. A form with no questions
/// counts as complete.
pub fn completion_percentage(answered: usize, total: usize) -> i32 {
    if total == 0 {
        return 100;
    }
    let answered = answered.min(total);
    ((answered * 200 + total) / (2 * total)) as i32
}

pub fn completion_status(answered: usize, total: usize) -> CompletionStatus {
    let pct = completion_percentage(answered, total);
    let status = if pct >= 100 {
        FormStatus::Completed
    } else if answered > 0 {
        FormStatus::InProgress
    } else {
        FormStatus::NotStarted
    };
    CompletionStatus {
        completion_percentage: pct,
        status,
        answered: answered.min(total),
        total,
    }
}

/// Drive a batch one answer at a time. A failed item is recorded and the
/// rest still run.
pub async fn run_batch<F, Fut>(answers: &[AnswerInput], mut save: F) -> (Vec<BatchItemResult>, Vec<Alert>)
where
    F: FnMut(AnswerInput) -> Fut,
    Fut: Future<Output = AppResult<Vec<Alert>>>,
{
    let mut results = Vec::with_capacity(answers.len());
    let mut all_alerts = Vec::new();

    for answer in answers {
        let question_id = answer.question_id.clone();
        match save(answer.clone()).await {
            Ok(alerts) => {
                all_alerts.extend(alerts.iter().cloned());
                results.push(BatchItemResult { question_id, success: true, error: None, alerts });
            }
            Err(e) => {
                if e.status().is_server_error() {
                    tracing::error!(%question_id, error = %e, "batch item failed");
                }
                results.push(BatchItemResult {
                    question_id,
                    success: false,
                    error: Some(e.public_message()),
                    alerts: Vec::new(),
                });
            }
        }
    }
    (results, all_alerts)
}

pub struct FormResponseHandler {
    pool: PgPool,
    scope: TenantScope,
    alerts: Arc<AlertEngine>,
}

impl FormResponseHandler {
    pub fn new(pool: PgPool, scope: TenantScope, alerts: Arc<AlertEngine>) -> Self {
        Self { pool, scope, alerts }
    }

    pub async fn instance(&self, id: Uuid) -> AppResult<PatientFormInstance> {
        let mut qb = self.scope.select("SELECT * FROM patient_form_instances", "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.build_query_as::<PatientFormInstance>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Form instance"))
    }

    async fn load(&self, patient_form_id: Uuid) -> AppResult<(PatientFormInstance, ConversationalFlow)> {
        let instance = self.instance(patient_form_id).await?;
        let flow = FormExtractionService::new(self.pool.clone(), self.scope)
            .flow(instance.form_template_id)
            .await?;
        Ok((instance, flow))
    }

    pub async fn create_instance(&self, req: &CreateFormInstanceRequest) -> AppResult<PatientFormInstance> {
        let patient = PatientService::new(self.pool.clone(), self.scope).get(req.patient_id).await?;
        let template = FormExtractionService::new(self.pool.clone(), self.scope)
            .template(req.form_template_id)
            .await?;
        if template.tenant_id != patient.tenant_id {
            return Err(AppError::NotFound("Form template"));
        }
        if let Some(task_id) = req.task_id {
            let task = TaskService::new(self.pool.clone(), self.scope).get(task_id).await?;
            if task.patient_id != patient.id {
                return Err(AppError::Validation("Task belongs to another patient".into()));
            }
        }

        let instance = sqlx::query_as::<_, PatientFormInstance>(
            "INSERT INTO patient_form_instances (tenant_id, patient_id, form_template_id, task_id)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(patient.tenant_id)
        .bind(patient.id)
        .bind(template.id)
        .bind(req.task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(instance)
    }

    /// Current answer per question: the newest row wins.
    pub async fn latest_responses(&self, patient_form_id: Uuid) -> AppResult<Vec<FormResponse>> {
        let mut qb = self.scope.select("SELECT DISTINCT ON (question_id) * FROM form_responses", "tenant_id");
        qb.push(" AND patient_form_id = ");
        qb.push_bind(patient_form_id);
        qb.push(" ORDER BY question_id, created_at DESC, id DESC");
        Ok(qb.build_query_as::<FormResponse>().fetch_all(&self.pool).await?)
    }

    pub async fn save_response(&self, req: &SubmitResponseRequest, responded_by: Uuid) -> AppResult<SaveOutcome> {
        let (instance, flow) = self.load(req.patient_form_id).await?;
        let saved = self.save_one(&instance, &flow, req.answer.clone(), responded_by).await?;
        Ok(SaveOutcome {
            success: true,
            response_id: saved.response_id,
            alerts: saved.alerts,
            completion_status: saved.completion,
        })
    }

    pub async fn save_batch(&self, req: &SubmitBatchRequest, responded_by: Uuid) -> AppResult<BatchOutcome> {
        let (instance, flow) = self.load(req.patient_form_id).await?;

        let this = self;
        let instance_ref = &instance;
        let flow_ref = &flow;
        let (results, alerts) = run_batch(&req.responses, move |answer| async move {
            this.save_one(instance_ref, flow_ref, answer, responded_by)
                .await
                .map(|saved| saved.alerts)
        })
        .await;

        let mut conn = self.pool.acquire().await?;
        let completion = answered_status(&mut conn, instance.id, &flow).await?;
        let succeeded = results.iter().filter(|r| r.success).count();
        Ok(BatchOutcome {
            succeeded,
            failed: results.len() - succeeded,
            results,
            alerts,
            completion_status: completion,
        })
    }

    async fn save_one(
        &self,
        instance: &PatientFormInstance,
        flow: &ConversationalFlow,
        answer: AnswerInput,
        responded_by: Uuid,
    ) -> AppResult<Saved> {
        let tenant_label = instance.tenant_id.to_string();
        let step = flow
            .step(&answer.question_id)
            .ok_or_else(|| AppError::Validation(format!("Unknown question '{}'", answer.question_id)))?;

        let outcome = validation::validate(step, &answer.response)?;
        if !outcome.is_valid {
            metrics::FORM_RESPONSES_COUNTER
                .with_label_values(&[&tenant_label, "invalid"])
                .inc();
            return Err(AppError::Validation(
                outcome.error.unwrap_or_else(|| "Invalid answer".into()),
            ));
        }

        let alerts = self.alerts.evaluate(step, &answer.response);

        let mut tx = self.pool.begin().await?;
        TenantScope::Scoped(instance.tenant_id).bind_session(&mut tx).await?;
        // Concurrent saves on one instance queue here, so each recount sees
        // every answer committed before it.
        lock_instance(&mut tx, instance).await?;

        let response_id: Uuid = sqlx::query_scalar(
            "INSERT INTO form_responses
                (tenant_id, patient_form_id, question_id, response_value, response_type,
                 response_method, time_to_respond_ms, alerts, responded_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id",
        )
        .bind(instance.tenant_id)
        .bind(instance.id)
        .bind(&step.question_id)
        .bind(sqlx::types::Json(&answer.response))
        .bind(answer.response_type.as_deref().unwrap_or(step.kind.as_str()))
        .bind(answer.response_method.as_deref().unwrap_or("text"))
        .bind(answer.time_to_respond)
        .bind(sqlx::types::Json(&alerts))
        .bind(responded_by)
        .fetch_one(&mut *tx)
        .await?;

        let completion = answered_status(&mut tx, instance.id, flow).await?;

        sqlx::query(
            "UPDATE patient_form_instances
             SET completion_percentage = $1,
                 status = $2,
                 started_at = COALESCE(started_at, NOW()),
                 completed_at = CASE WHEN $2 = 'completed'::form_status
                                     THEN COALESCE(completed_at, NOW()) ELSE NULL END
             WHERE id = $3 AND tenant_id = $4",
        )
        .bind(completion.completion_percentage)
        .bind(completion.status)
        .bind(instance.id)
        .bind(instance.tenant_id)
        .execute(&mut *tx)
        .await?;

        if completion.status == FormStatus::Completed {
            if let Some(task_id) = instance.task_id {
                sqlx::query(
                    "UPDATE patient_tasks
                     SET status = 'completed', completed_at = COALESCE(completed_at, NOW())
                     WHERE id = $1 AND tenant_id = $2",
                )
                .bind(task_id)
                .bind(instance.tenant_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        metrics::FORM_RESPONSES_COUNTER
            .with_label_values(&[&tenant_label, "accepted"])
            .inc();
        for alert in &alerts {
            metrics::ALERTS_COUNTER
                .with_label_values(&[&tenant_label, &alert.rule])
                .inc();
            tracing::warn!(
                patient_form_id = %instance.id,
                patient_id = %instance.patient_id,
                question_id = %alert.question_id,
                rule = %alert.rule,
                severity = ?alert.severity,
                "form alert raised"
            );
        }

        Ok(Saved { response_id, alerts, completion })
    }

    /// Form instances due on a protocol day for one patient.
    pub async fn protocol_forms(&self, query: &ProtocolFormsQuery) -> AppResult<Vec<ProtocolForm>> {
        let mut qb = self.scope.select(
            "SELECT fi.id AS instance_id, fi.form_template_id, ft.title, t.id AS task_id,
                    t.due_date, t.day_offset, fi.status, fi.completion_percentage
             FROM patient_form_instances fi
             JOIN patient_tasks t ON t.id = fi.task_id
             JOIN patient_protocols pp ON pp.id = t.assignment_id
             JOIN form_templates ft ON ft.id = fi.form_template_id",
            "fi.tenant_id",
        );
        qb.push(" AND fi.patient_id = ");
        qb.push_bind(query.patient_id);
        qb.push(" AND t.day_offset = ");
        qb.push_bind(query.day);
        match query.protocol_id {
            Some(protocol_id) => {
                qb.push(" AND pp.protocol_id = ");
                qb.push_bind(protocol_id);
            }
            None => {
                qb.push(" AND pp.status = 'active'");
            }
        }
        qb.push(" ORDER BY t.due_date, ft.title");
        Ok(qb.build_query_as::<ProtocolForm>().fetch_all(&self.pool).await?)
    }
}

struct Saved {
    response_id: Uuid,
    alerts: Vec<Alert>,
    completion: CompletionStatus,
}

/// Count the flow's questions that have at least one stored answer.
async fn answered_status(
    conn: &mut PgConnection,
    patient_form_id: Uuid,
    flow: &ConversationalFlow,
) -> AppResult<CompletionStatus> {
    let question_ids: Vec<String> = flow.steps.iter().map(|s| s.question_id.clone()).collect();
    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT question_id)::BIGINT FROM form_responses
         WHERE patient_form_id = $1 AND question_id = ANY($2)",
    )
    .bind(patient_form_id)
    .bind(&question_ids)
    .fetch_one(conn)
    .await?;
    Ok(completion_status(answered.max(0) as usize, flow.total_steps))
}

const LOCK_INSTANCE: &str =
    "SELECT 1 FROM patient_form_instances WHERE id = $1 AND tenant_id = $2 FOR UPDATE";

/// Row-lock the instance for the rest of the transaction.
async fn lock_instance(conn: &mut PgConnection, instance: &PatientFormInstance) -> AppResult<()> {
    sqlx::query(LOCK_INSTANCE)
        .bind(instance.id)
        .bind(instance.tenant_id)
        .fetch_optional(conn)
        .await?
        .ok_or(AppError::NotFound("Form instance"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::form::FlowStep;
    use serde_json::{json, Value};

    #[test]
    fn completion_rounds_half_up() {
        assert_eq!(completion_percentage(0, 3), 0);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 67);
        assert_eq!(completion_percentage(1, 8), 13);
        assert_eq!(completion_percentage(3, 3), 100);
        assert_eq!(completion_percentage(0, 0), 100);
    }

    #[test]
    fn saves_serialize_on_the_instance_row() {
        assert!(LOCK_INSTANCE.starts_with("SELECT 1 FROM patient_form_instances"));
        assert!(LOCK_INSTANCE.contains("id = $1 AND tenant_id = $2"));
        assert!(LOCK_INSTANCE.ends_with("FOR UPDATE"));
    }

    #[test]
    fn answering_every_question_reaches_completed() {
        let n = 7;
        let mut last = 0;
        for answered in 1..=n {
            let status = completion_status(answered, n);
            assert!(status.completion_percentage > last);
            last = status.completion_percentage;
            if answered < n {
                assert_eq!(status.status, FormStatus::InProgress);
            }
        }
        let done = completion_status(n, n);
        assert_eq!(done.completion_percentage, 100);
        assert_eq!(done.status, FormStatus::Completed);
        assert_eq!(completion_status(0, n).status, FormStatus::NotStarted);
    }

    fn scale_step(id: &str) -> FlowStep {
        FlowStep {
            index: 0,
            section_id: "s".into(),
            section_title: String::new(),
            question_id: id.into(),
            text: "Pain level".into(),
            kind: "scale".into(),
            required: true,
            validation: Default::default(),
            tag: None,
        }
    }

    fn answer(id: &str, response: Value) -> AnswerInput {
        AnswerInput {
            question_id: id.into(),
            response,
            response_type: None,
            response_method: None,
            time_to_respond: None,
        }
    }

    #[tokio::test]
    async fn batch_reports_each_item() {
        let engine = AlertEngine::with_defaults(7.0);
        let answers = vec![
            answer("a", json!(2)),
            answer("b", json!(3)),
            answer("c", json!("not a number")),
            answer("d", json!(8)),
            answer("e", json!(0)),
        ];

        let check = |a: &AnswerInput| -> AppResult<Vec<Alert>> {
            let step = scale_step(&a.question_id);
            let outcome = validation::validate(&step, &a.response)?;
            if !outcome.is_valid {
                return Err(AppError::Validation(outcome.error.unwrap_or_default()));
            }
            Ok(engine.evaluate(&step, &a.response))
        };
        let (results, alerts) = run_batch(&answers, |a| {
            let result = check(&a);
            async move { result }
        })
        .await;

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| !r.success).count(), 1);
        assert_eq!(results[2].question_id, "c");
        assert!(results[2].error.is_some());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].question_id, "d");
    }
}
