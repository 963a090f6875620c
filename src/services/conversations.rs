use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::tenant::TenantScope,
    error::{AppError, AppResult},
    models::{
        conversation::{Conversation, Message, SenderType},
        patient::Patient,
        task::{PatientTask, TaskStatus},
    },
    services::{
        llm::{ChatMessage, LlmClient},
        metrics,
        recovery::{self, Phase, Recovery},
        tasks::TaskService,
    },
};

/// Messages sent to the model as history, newest last.
const HISTORY_WINDOW: usize = 20;
const REPLY_TEMPERATURE: f32 = 0.4;
const REPLY_MAX_TOKENS: u32 = 400;

pub struct ConversationService {
    pool: PgPool,
    scope: TenantScope,
}

impl ConversationService {
    pub fn new(pool: PgPool, scope: TenantScope) -> Self {
        Self { pool, scope }
    }

    pub async fn create(&self, patient: &Patient, title: Option<&str>) -> AppResult<Conversation> {
        if !self.scope.owns(patient.tenant_id) {
            return Err(AppError::NotFound("Patient"));
        }
        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (tenant_id, patient_id, title)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(patient.tenant_id)
        .bind(patient.id)
        .bind(title.map(str::trim).filter(|t| !t.is_empty()))
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Conversation> {
        let mut qb = self.scope.select("SELECT * FROM conversations", "tenant_id");
        qb.push(" AND id = ");
        qb.push_bind(id);
        qb.build_query_as::<Conversation>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("Conversation"))
    }

    pub async fn messages(&self, conversation_id: Uuid) -> AppResult<Vec<Message>> {
        let mut qb = self.scope.select("SELECT * FROM messages", "tenant_id");
        qb.push(" AND conversation_id = ");
        qb.push_bind(conversation_id);
        qb.push(" ORDER BY created_at, id");
        Ok(qb.build_query_as::<Message>().fetch_all(&self.pool).await?)
    }

    /// The newest `limit` messages, returned oldest first.
    pub async fn recent_messages(&self, conversation_id: Uuid, limit: usize) -> AppResult<Vec<Message>> {
        let mut qb = recent_messages_query(self.scope, conversation_id, limit);
        let mut rows = qb.build_query_as::<Message>().fetch_all(&self.pool).await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn append(
        &self,
        conversation: &Conversation,
        sender_type: SenderType,
        sender_id: Option<Uuid>,
        content: &str,
    ) -> AppResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Message content is required".into()));
        }
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (tenant_id, conversation_id, sender_type, sender_id, content)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(conversation.tenant_id)
        .bind(conversation.id)
        .bind(sender_type)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    /// Ask the model for the assistant's next message and record it.
    pub async fn reply(
        &self,
        llm: &LlmClient,
        conversation: &Conversation,
        patient: &Patient,
    ) -> AppResult<Message> {
        let today = recovery::today();
        let due = TaskService::new(self.pool.clone(), self.scope)
            .due_on(patient.id, today)
            .await?;
        let history = self.recent_messages(conversation.id, HISTORY_WINDOW).await?;

        let mut prompt = vec![ChatMessage::system(system_prompt(
            patient,
            recovery::classify(patient.surgery_date, today),
            &due,
        ))];
        prompt.extend(to_chat(&history));

        let tenant_label = conversation.tenant_id.to_string();
        let text = match llm.complete(&prompt, llm.model(), REPLY_TEMPERATURE, REPLY_MAX_TOKENS).await {
            Ok(text) => text,
            Err(e) => {
                metrics::AI_REPLIES_COUNTER
                    .with_label_values(&[&tenant_label, "failed"])
                    .inc();
                return Err(e);
            }
        };

        let message = self.append(conversation, SenderType::Ai, None, &text).await?;
        metrics::AI_REPLIES_COUNTER
            .with_label_values(&[&tenant_label, "ok"])
            .inc();
        tracing::debug!(conversation_id = %conversation.id, "assistant reply recorded");
        Ok(message)
    }
}

fn recent_messages_query(
    scope: TenantScope,
    conversation_id: Uuid,
    limit: usize,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = scope.select("SELECT * FROM messages", "tenant_id");
    qb.push(" AND conversation_id = ");
    qb.push_bind(conversation_id);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    qb
}

pub fn system_prompt(patient: &Patient, recovery: Recovery, due_today: &[PatientTask]) -> String {
    let stage = match (recovery.phase, recovery.day) {
        (_, None) => "has no surgery date scheduled yet".to_string(),
        (Phase::PreOp, Some(day)) => format!("is {} day(s) before surgery", -day),
        (Phase::PostOp, Some(0)) => "had surgery today".to_string(),
        (Phase::PostOp, Some(day)) => format!("is on post-operative day {day}"),
    };

    let mut prompt = format!(
        "You are a recovery assistant for a patient preparing for or recovering from {}. \
         The patient {stage}. Answer briefly and kindly. Do not diagnose; tell the patient \
         to contact their care team for anything urgent.",
        patient.surgery_type.label()
    );

    let open: Vec<&PatientTask> = due_today
        .iter()
        .filter(|t| t.status != TaskStatus::Completed)
        .collect();
    if open.is_empty() {
        prompt.push_str("\nThe patient has no open tasks today.");
    } else {
        prompt.push_str("\nTasks due today:");
        for task in open {
            prompt.push_str(&format!("\n- {}", task.title));
        }
    }
    prompt
}

/// Map stored messages to model roles, keeping the most recent window.
pub fn to_chat(history: &[Message]) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .map(|m| match m.sender_type {
            SenderType::Ai => ChatMessage::assistant(m.content.clone()),
            SenderType::Patient => ChatMessage::user(m.content.clone()),
            SenderType::Nurse => ChatMessage::user(format!("[Nurse] {}", m.content)),
            SenderType::System => ChatMessage::system(m.content.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        patient::{PatientStatus, SurgeryType},
        protocol::TaskType,
    };
    use chrono::{NaiveDate, Utc};

    fn patient() -> Patient {
        Patient {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            mrn: "MRN-00000001".into(),
            surgery_date: NaiveDate::from_ymd_opt(2025, 1, 10),
            surgery_type: SurgeryType::Tka,
            status: PatientStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn task(title: &str, status: TaskStatus) -> PatientTask {
        PatientTask {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            assignment_id: Uuid::nil(),
            patient_id: Uuid::nil(),
            protocol_task_id: Uuid::nil(),
            task_type: TaskType::Exercise,
            title: title.into(),
            content_ref: None,
            day_offset: 3,
            due_date: NaiveDate::from_ymd_opt(2025, 1, 13).unwrap(),
            status,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    fn message(sender_type: SenderType, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            conversation_id: Uuid::nil(),
            sender_type,
            sender_id: None,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn reply_history_is_bounded_in_the_query() {
        let scope = TenantScope::Scoped(Uuid::new_v4());
        let qb = recent_messages_query(scope, Uuid::new_v4(), HISTORY_WINDOW);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM messages WHERE tenant_id = $1 AND conversation_id = $2 \
             ORDER BY created_at DESC, id DESC LIMIT $3"
        );
    }

    #[test]
    fn prompt_lists_open_tasks_for_today() {
        let recovery = Recovery { phase: Phase::PostOp, day: Some(3) };
        let prompt = system_prompt(
            &patient(),
            recovery,
            &[task("Quad sets x10", TaskStatus::Pending), task("Ice knee", TaskStatus::Completed)],
        );
        assert!(prompt.contains("post-operative day 3"));
        assert!(prompt.contains("total knee arthroplasty"));
        assert!(prompt.contains("- Quad sets x10"));
        assert!(!prompt.contains("Ice knee"));
    }

    #[test]
    fn prompt_without_surgery_date_or_tasks() {
        let recovery = Recovery { phase: Phase::PreOp, day: None };
        let prompt = system_prompt(&patient(), recovery, &[]);
        assert!(prompt.contains("no surgery date"));
        assert!(prompt.contains("no open tasks"));
    }

    #[test]
    fn history_maps_roles_and_keeps_recent_window() {
        let mut history = vec![message(SenderType::System, "welcome")];
        for i in 0..30 {
            history.push(message(SenderType::Patient, &format!("q{i}")));
        }
        history.push(message(SenderType::Nurse, "call us"));
        history.push(message(SenderType::Ai, "ok"));

        let chat = to_chat(&history);
        assert_eq!(chat.len(), HISTORY_WINDOW);
        assert_eq!(chat.last().unwrap().role, "assistant");
        assert_eq!(chat[chat.len() - 2].content, "[Nurse] call us");
        assert!(chat.iter().all(|m| m.content != "welcome"));
    }
}
