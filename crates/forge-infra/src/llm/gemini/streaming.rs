//! SSE stream creation and chunk mapping for the Gemini API.
//!
//! With `alt=sse` every `data:` payload is a complete `GenerateContentResponse`
//! carrying a text increment. Usage metadata is cumulative, so only the last
//! value seen is reported, once, right before `Done`. `Done` is only yielded
//! after a chunk carried a finish reason; a connection that closes before
//! that ends the stream with an error.

use std::fmt::Display;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};

use forge_core::llm::provider::GenerationStream;
use forge_types::llm::{GenerationError, StreamEvent, Usage};

use super::types::{GeminiErrorBody, GeminiRequest, GeminiResponse};

/// Finish reasons that mean the candidate was withheld by a safety filter.
const FILTERED_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// State carried across the chunks of one stream.
#[derive(Debug, Default)]
pub struct ChunkState {
    /// Last usage metadata seen.
    pub usage: Option<Usage>,
    /// A non-filtered finish reason (`STOP`, `MAX_TOKENS`, ...) was seen.
    pub finished: bool,
}

/// Create a streaming SSE connection to `streamGenerateContent`.
pub fn create_gemini_stream(
    client: &reqwest::Client,
    url: &str,
    body: GeminiRequest,
    api_key: &SecretString,
) -> GenerationStream {
    let client = client.clone();
    let url = url.to_string();
    let api_key = api_key.expose_secret().to_string();

    Box::pin(async_stream::try_stream! {
        let response = client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        let response = if status.is_success() {
            response
        } else {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %error_body, "Gemini stream API error response");
            Err::<(), _>(status_error(status.as_u16(), &error_body, retry_after_ms))?;
            unreachable!()
        };

        let mut events = map_event_stream(response.bytes_stream());
        while let Some(event) = events.next().await {
            yield event?;
        }
    })
}

/// Map an SSE byte stream of Gemini chunks to [`StreamEvent`]s.
///
/// Split out from [`create_gemini_stream`] so it can be driven without HTTP.
pub fn map_event_stream<S, B, E>(bytes: S) -> GenerationStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = Box::pin(bytes.eventsource());
        let mut state = ChunkState::default();

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| GenerationError::Stream(e.to_string()))?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }

            let chunk: GeminiResponse = serde_json::from_str(data)
                .map_err(|e| GenerationError::Deserialization(format!("gemini chunk: {e}")))?;

            for mapped in map_chunk(chunk, &mut state)? {
                yield mapped;
            }
        }

        if !state.finished {
            Err::<(), _>(GenerationError::Stream(
                "stream ended before completion".to_string(),
            ))?;
        }
        if let Some(usage) = state.usage {
            yield StreamEvent::Usage(usage);
        }
        yield StreamEvent::Done;
    })
}

/// Convert one response chunk into text events, recording usage and
/// whether the candidate finished.
///
/// Errors embedded in the payload and safety blocks end the stream.
pub fn map_chunk(
    chunk: GeminiResponse,
    state: &mut ChunkState,
) -> Result<Vec<StreamEvent>, GenerationError> {
    if let Some(error) = chunk.error {
        return Err(GenerationError::Provider {
            message: error
                .message
                .unwrap_or_else(|| "unknown Gemini error".to_string()),
        });
    }

    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(GenerationError::ContentFiltered(reason));
    }

    if let Some(meta) = chunk.usage_metadata {
        let prompt_tokens = meta.prompt_token_count.unwrap_or(0);
        let completion_tokens = meta.candidates_token_count.unwrap_or(0);
        state.usage = Some(Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: meta
                .total_token_count
                .unwrap_or(prompt_tokens + completion_tokens),
        });
    }

    let mut events = Vec::new();
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(events);
    };

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if FILTERED_FINISH_REASONS.contains(&reason) {
            return Err(GenerationError::ContentFiltered(reason.to_string()));
        }
        state.finished = true;
    }

    if let Some(content) = candidate.content {
        for part in content.parts {
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta { text });
            }
        }
    }

    Ok(events)
}

/// Map a non-2xx status and its body to a [`GenerationError`].
pub fn status_error(status: u16, body: &str, retry_after_ms: Option<u64>) -> GenerationError {
    let message = serde_json::from_str::<GeminiErrorBody>(body)
        .ok()
        .and_then(|b| b.error.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => GenerationError::AuthenticationFailed,
        429 => GenerationError::RateLimited { retry_after_ms },
        400 => GenerationError::InvalidRequest(message),
        _ => GenerationError::Provider {
            message: format!("HTTP {status}: {message}"),
        },
    }
}
