//! Conversation management endpoints.
//!
//! Every route is scoped to the calling user; another user's conversation
//! is reported as not found.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use forge_core::conversation::service::ConversationDetail;
use forge_types::chat::{Conversation, ConversationSetup};

use crate::http::error::AppError;
use crate::http::extractors::auth::CurrentUser;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Request body for creating a conversation through the setup flow.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub system_override: Option<String>,
}

/// Request body for updating a conversation.
///
/// Setup fields replace the stored setup as a whole: sending only
/// `context` clears an existing `system_override`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub system_override: Option<String>,
}

impl UpdateConversationRequest {
    fn setup(&self) -> Option<ConversationSetup> {
        if self.context.is_none() && self.system_override.is_none() {
            return None;
        }
        Some(ConversationSetup {
            context: self.context.clone(),
            system_override: self.system_override.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RewindResponse {
    pub deleted: u64,
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    raw.parse()
        .map_err(|_| AppError::Validation(format!("Invalid {what} id: {raw}")))
}

fn conversation_href(id: &Uuid) -> String {
    format!("/api/v1/conversations/{id}")
}

/// GET /api/v1/conversations - Active conversations, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, AppError> {
    let timer = RequestTimer::start();
    let conversations = state.conversation_service.list(&user.id).await?;
    Ok(timer.respond(conversations))
}

/// POST /api/v1/conversations - Create an empty conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Conversation>>), AppError> {
    let timer = RequestTimer::start();
    let setup = ConversationSetup {
        context: body.context,
        system_override: body.system_override,
    };
    let conversation = state
        .conversation_service
        .create(user.id, body.title.as_deref(), setup)
        .await?;

    let href = conversation_href(&conversation.id);
    let response = timer.envelope(conversation).with_link("self", href);
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/conversations/{id} - Conversation with its active history.
pub async fn get_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ConversationDetail>>, AppError> {
    let timer = RequestTimer::start();
    let conversation_id = parse_uuid(&id, "conversation")?;
    let detail = state
        .conversation_service
        .detail(&user.id, &conversation_id)
        .await?;

    Ok(Json(
        timer
            .envelope(detail)
            .with_link("self", conversation_href(&conversation_id))
            .with_link("turns", "/api/v1/chat/turns"),
    ))
}

/// PUT /api/v1/conversations/{id} - Rename and/or replace the setup.
pub async fn update_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateConversationRequest>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let timer = RequestTimer::start();
    let conversation_id = parse_uuid(&id, "conversation")?;

    let setup = body.setup();
    if body.title.is_none() && setup.is_none() {
        return Err(AppError::Validation(
            "Provide a title, context or system_override to update".to_string(),
        ));
    }

    if let Some(title) = &body.title {
        state
            .conversation_service
            .rename(&user.id, &conversation_id, title)
            .await?;
    }
    if let Some(setup) = &setup {
        state
            .conversation_service
            .update_setup(&user.id, &conversation_id, setup)
            .await?;
    }

    let detail = state
        .conversation_service
        .detail(&user.id, &conversation_id)
        .await?;
    Ok(timer.respond(detail.conversation))
}

/// DELETE /api/v1/conversations/{id} - Soft-delete a conversation.
pub async fn delete_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let timer = RequestTimer::start();
    let conversation_id = parse_uuid(&id, "conversation")?;
    state
        .conversation_service
        .delete(&user.id, &conversation_id)
        .await?;

    Ok(timer.respond(serde_json::json!({
        "deleted": true,
        "id": conversation_id,
    })))
}

/// DELETE /api/v1/conversations/{id}/messages/{message_id} - Rewind.
///
/// Deactivates the message and everything after it. Repeating the call
/// succeeds with `deleted: 0`.
pub async fn rewind_conversation(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, message_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<RewindResponse>>, AppError> {
    let timer = RequestTimer::start();
    let conversation_id = parse_uuid(&id, "conversation")?;
    let message_id = parse_uuid(&message_id, "message")?;

    let deleted = state
        .conversation_service
        .rewind(&user.id, &conversation_id, &message_id)
        .await?;
    Ok(timer.respond(RewindResponse { deleted }))
}
