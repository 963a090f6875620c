use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::rate_limit::check_rate_limit,
    models::{
        auth::TenantContext,
        form::{
            BatchOutcome, ConversationalFlow, CreateFormInstanceRequest, CreateFormTemplateRequest,
            FormResponse, FormTemplate, PatientFormInstance, ProtocolForm, ProtocolFormsQuery,
            SaveOutcome, SubmitBatchRequest, SubmitResponseRequest,
        },
    },
    routes::require_staff,
    services::{
        audit::{self, AuditEntry},
        forms::{extraction::FormExtractionService, responses::FormResponseHandler},
        patients::PatientService,
    },
    AppState,
};

const MAX_BATCH: usize = 200;

fn handler(state: &AppState, ctx: &TenantContext) -> FormResponseHandler {
    FormResponseHandler::new(state.db.clone(), ctx.scope, state.alerts.clone())
}

/// Load an instance the caller may act on: staff in scope, or the patient it belongs to.
async fn authorized_instance(
    state: &AppState,
    ctx: &TenantContext,
    handler: &FormResponseHandler,
    id: Uuid,
) -> AppResult<PatientFormInstance> {
    let instance = handler.instance(id).await?;
    PatientService::new(state.db.clone(), ctx.scope)
        .get_for(ctx, instance.patient_id)
        .await?;
    Ok(instance)
}

async fn limit_submissions(state: &AppState, ctx: &TenantContext) -> AppResult<()> {
    check_rate_limit(
        state.redis.as_ref(),
        &format!("rate:forms:{}", ctx.user_id),
        state.config.submit_rate_limit,
        60,
    )
    .await
}

pub async fn create_template(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<CreateFormTemplateRequest>,
) -> AppResult<(StatusCode, Json<FormTemplate>)> {
    require_staff(&ctx)?;
    let template = FormExtractionService::new(state.db.clone(), ctx.scope)
        .create_template(&body)
        .await?;

    audit::log(
        state.db.clone(),
        AuditEntry::new("form_template.created", ctx.user_id, Some(template.tenant_id))
            .resource("form_template", template.id)
            .metadata(json!({ "title": template.title })),
    );
    Ok((StatusCode::CREATED, Json(template)))
}

/// GET /forms/templates/{id}/flow
pub async fn template_flow(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConversationalFlow>> {
    let flow = FormExtractionService::new(state.db.clone(), ctx.scope).flow(id).await?;
    Ok(Json(flow))
}

pub async fn create_instance(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<CreateFormInstanceRequest>,
) -> AppResult<(StatusCode, Json<PatientFormInstance>)> {
    require_staff(&ctx)?;
    let instance = handler(&state, &ctx).create_instance(&body).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /forms/instances/{id}/responses: latest answer per question.
pub async fn list_responses(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<FormResponse>>> {
    let handler = handler(&state, &ctx);
    let instance = authorized_instance(&state, &ctx, &handler, id).await?;
    Ok(Json(handler.latest_responses(instance.id).await?))
}

pub async fn submit_response(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<SubmitResponseRequest>,
) -> AppResult<Json<SaveOutcome>> {
    limit_submissions(&state, &ctx).await?;
    let handler = handler(&state, &ctx);
    authorized_instance(&state, &ctx, &handler, body.patient_form_id).await?;

    let outcome = handler.save_response(&body, ctx.user_id).await?;
    Ok(Json(outcome))
}

pub async fn submit_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(body): Json<SubmitBatchRequest>,
) -> AppResult<Json<BatchOutcome>> {
    if body.responses.is_empty() {
        return Err(AppError::Validation("No responses submitted".into()));
    }
    if body.responses.len() > MAX_BATCH {
        return Err(AppError::Validation(format!("At most {MAX_BATCH} responses per batch")));
    }
    limit_submissions(&state, &ctx).await?;
    let handler = handler(&state, &ctx);
    authorized_instance(&state, &ctx, &handler, body.patient_form_id).await?;

    let outcome = handler.save_batch(&body, ctx.user_id).await?;
    if outcome.failed > 0 {
        tracing::info!(
            patient_form_id = %body.patient_form_id,
            failed = outcome.failed,
            succeeded = outcome.succeeded,
            "batch submitted with rejected items"
        );
    }
    Ok(Json(outcome))
}

/// GET /forms/protocol-forms?patientId=&day=&protocolId=
pub async fn protocol_forms(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<ProtocolFormsQuery>,
) -> AppResult<Json<Vec<ProtocolForm>>> {
    PatientService::new(state.db.clone(), ctx.scope)
        .get_for(&ctx, query.patient_id)
        .await?;
    let forms = handler(&state, &ctx).protocol_forms(&query).await?;
    Ok(Json(forms))
}
