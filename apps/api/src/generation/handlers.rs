//! Axum route handlers for the Generation API.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    Json,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::generation::builder::build_prompt;
use crate::generation::models::{DescribeBody, GenerationRequest, PromptMode};
use crate::generation::relay::{event_stream_response, relay, RelayOptions};
use crate::generation::templates::{InstructionTemplate, TemplateScope};
use crate::llm_client::{CompletionRequest, LlmError, Message};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SkillSummary {
    pub id: String,
    pub name: String,
    pub scope: TemplateScope,
}

#[derive(Debug, Serialize)]
pub struct ListSkillsResponse {
    pub skills: Vec<SkillSummary>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/projects/:project_id/describe
///
/// Streams a drafted description as `text/event-stream`. Every failure up to
/// and including the provider handshake is an ordinary JSON error; after that
/// the response is committed and failures arrive as `{error}` frames.
pub async fn handle_describe(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    body: Result<Json<DescribeBody>, JsonRejection>,
) -> Result<Response, AppError> {
    // Wrong JSON types (a null title, say) are input errors like a blank title.
    let Json(body) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let briefing = state.projects.briefing(&project_id).await;
    let request = GenerationRequest::from_body(body, briefing)?;

    let template = match &request.mode {
        PromptMode::Template(id) => Some(resolve_template(&state, &project_id, id).await?),
        _ => None,
    };

    let provider = state.provider.clone().ok_or(LlmError::Unavailable)?;

    let prompt = build_prompt(&request, template.as_ref());
    let completion = CompletionRequest {
        messages: vec![Message::system(prompt.system), Message::user(prompt.user)],
        max_tokens: state.config.max_tokens,
        temperature: state.config.temperature,
    };

    let id = Uuid::new_v4();
    let source = request.mode.to_string();
    info!(
        "Generation {id} started: project={project_id}, source={}, provider={}, model={}",
        request.mode.log_label(),
        provider.name(),
        provider.model()
    );
    debug!("Generation {id} prompt source: {source}");

    let deltas = provider.stream(completion).await.map_err(|e| {
        warn!("Generation {id} handshake failed: {e}");
        AppError::Llm(e)
    })?;

    event_stream_response(relay(
        deltas,
        RelayOptions {
            id,
            timeout: state.config.generation_timeout,
            source,
            audit: state.audit.clone(),
        },
    ))
}

/// GET /api/v1/projects/:project_id/skills
///
/// Instruction templates usable from this project, in catalog order.
pub async fn handle_list_skills(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<ListSkillsResponse>, AppError> {
    let skills = state
        .templates
        .list()
        .await
        .into_iter()
        .filter(|t| t.scope.visible_to(&project_id))
        .map(|t| SkillSummary {
            id: t.id,
            name: t.name,
            scope: t.scope,
        })
        .collect();

    Ok(Json(ListSkillsResponse { skills }))
}

/// A template scoped to another project is reported exactly like a missing one.
async fn resolve_template(
    state: &AppState,
    project_id: &str,
    id: &str,
) -> Result<InstructionTemplate, AppError> {
    state
        .templates
        .lookup(id)
        .await
        .filter(|t| t.scope.visible_to(project_id))
        .ok_or_else(|| AppError::NotFound(format!("Skill '{id}' not found")))
}
