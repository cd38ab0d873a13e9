//! Generation request/stream types for Adventure Forge.
//!
//! These types model the data shapes exchanged with a streaming text
//! generation provider: the request (system instructions, prior turns and
//! the new prompt), the events of a stream, and its failure modes.

use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, MessageRole};

/// One prior turn of conversation sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl From<&ChatMessage> for Message {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Request for one streamed generation.
///
/// `history` excludes `prompt`, which is sent as the final user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub system: String,
    pub history: Vec<Message>,
    pub prompt: String,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Events emitted during a streaming generation.
///
/// Failures are never sent as events; they arrive as the `Err` side of the
/// stream item so they cannot be mistaken for generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A fragment of generated text.
    TextDelta { text: String },

    /// Token usage information (may arrive more than once; last wins).
    Usage(Usage),

    /// The provider signalled normal completion.
    Done,
}

/// Errors from generation provider operations.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("content filtered: {0}")]
    ContentFiltered(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
