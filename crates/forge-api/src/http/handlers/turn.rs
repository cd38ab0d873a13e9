//! SSE streaming chat turn endpoint.
//!
//! POST /api/v1/chat/turns
//!
//! Validation, the credit pre-check and the user-message commit happen
//! before the response starts, so those failures are plain JSON errors
//! (400, 402, 404). Once streaming starts the outcome arrives in-band.
//!
//! SSE event types:
//! - `fragment` — incremental text: `{ "text": "..." }`
//! - `error` — the turn was discarded: `{ "code": "...", "message": "..." }`
//! - `complete` — the turn was saved and debited:
//!   `{ "conversationId", "userMessageId", "assistantMessageId", "creditsRemaining" }`
//!
//! The conversation id is also returned in the `x-conversation-id` header,
//! so clients that asked for a new conversation learn it even on failure.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use forge_core::turn::orchestrator::TurnRequest;
use forge_types::turn::{ConversationTarget, TurnEvent};

use crate::http::error::AppError;
use crate::http::extractors::auth::CurrentUser;
use crate::state::AppState;

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(Debug, Deserialize)]
pub struct SubmitTurnRequest {
    /// Conversation to continue. Wins over `new`.
    pub conversation_id: Option<Uuid>,
    /// Start a fresh conversation. With neither field set, the most
    /// recently active conversation is continued.
    #[serde(default)]
    pub new: bool,
    pub message: String,
}

/// POST /api/v1/chat/turns — submit a message and stream the reply.
pub async fn submit_turn(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<SubmitTurnRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = TurnRequest {
        target: ConversationTarget::from_request(body.conversation_id, body.new),
        message: body.message,
    };
    let handle = state.orchestrator.start_turn(&user, request).await?;

    let headers = [(CONVERSATION_ID_HEADER, handle.conversation_id.to_string())];
    let mut events = handle.events;
    let stream = async_stream::stream! {
        while let Some(event) = events.recv().await {
            yield Ok::<_, Infallible>(to_sse(&event));
        }
    };

    Ok((
        headers,
        Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))),
    ))
}

fn to_sse(event: &TurnEvent) -> Event {
    match event {
        TurnEvent::Fragment { text } => Event::default()
            .event("fragment")
            .data(json!({ "text": text }).to_string()),
        TurnEvent::Failed { code, message } => Event::default()
            .event("error")
            .data(json!({ "code": code, "message": message }).to_string()),
        TurnEvent::Completed(completion) => Event::default()
            .event("complete")
            .data(serde_json::to_string(completion).unwrap_or_else(|_| "{}".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_most_recent() {
        let body: SubmitTurnRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(
            ConversationTarget::from_request(body.conversation_id, body.new),
            ConversationTarget::MostRecent
        );
    }

    #[test]
    fn test_request_new_flag() {
        let body: SubmitTurnRequest =
            serde_json::from_str(r#"{"message":"hi","new":true}"#).unwrap();
        assert!(body.new);
        assert!(body.conversation_id.is_none());
    }
}
