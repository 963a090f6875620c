use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    error::AppResult,
    middleware::rate_limit::check_rate_limit,
    models::{
        auth::TenantContext,
        conversation::{
            Conversation, CreateConversationRequest, Message, PostMessageRequest,
            PostMessageResponse, SenderType,
        },
        patient::Patient,
        profile::UserRole,
    },
    services::{conversations::ConversationService, patients::PatientService},
    AppState,
};

const CHAT_RATE_LIMIT: u64 = 20;

/// Load a conversation and its patient, checking the caller may see them.
async fn load(
    state: &AppState,
    ctx: &TenantContext,
    id: Uuid,
) -> AppResult<(ConversationService, Conversation, Patient)> {
    let service = ConversationService::new(state.db.clone(), ctx.scope);
    let conversation = service.get(id).await?;
    let patient = PatientService::new(state.db.clone(), ctx.scope)
        .get_for(ctx, conversation.patient_id)
        .await?;
    Ok((service, conversation, patient))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let patient = PatientService::new(state.db.clone(), ctx.scope)
        .get_for(&ctx, body.patient_id)
        .await?;
    let conversation = ConversationService::new(state.db.clone(), ctx.scope)
        .create(&patient, body.title.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<Message>>> {
    let (service, conversation, _) = load(&state, &ctx, id).await?;
    Ok(Json(service.messages(conversation.id).await?))
}

/// POST /conversations/{id}/messages. A patient message gets an AI reply
/// when a model is configured. The patient's message is kept even if the
/// reply fails.
pub async fn post_message(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<PostMessageRequest>,
) -> AppResult<(StatusCode, Json<PostMessageResponse>)> {
    check_rate_limit(
        state.redis.as_ref(),
        &format!("rate:chat:{}", ctx.user_id),
        CHAT_RATE_LIMIT,
        60,
    )
    .await?;

    let (service, conversation, patient) = load(&state, &ctx, id).await?;
    let sender_type = match ctx.role {
        UserRole::Patient => SenderType::Patient,
        _ => SenderType::Nurse,
    };
    let message = service
        .append(&conversation, sender_type, Some(ctx.user_id), &body.content)
        .await?;

    let reply = match (&state.llm, sender_type) {
        (Some(llm), SenderType::Patient) => Some(service.reply(llm, &conversation, &patient).await?),
        _ => None,
    };

    Ok((StatusCode::CREATED, Json(PostMessageResponse { message, reply })))
}
