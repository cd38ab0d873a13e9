//! GenerationProvider trait definition.
//!
//! The abstraction every streaming text-generation backend implements.
//! `stream` returns a boxed `'static` stream so the orchestrator can move it
//! into the task that drives a turn.

use std::pin::Pin;

use futures_util::Stream;

use forge_types::llm::{GenerationError, GenerationRequest, StreamEvent};

/// Boxed stream of generation events.
pub type GenerationStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, GenerationError>> + Send + 'static>>;

/// Trait for streaming generation backends (Gemini, test doubles).
///
/// All methods are synchronous or return boxed streams, so the trait is
/// object-safe and is held as `Arc<dyn GenerationProvider>`.
///
/// A stream is lazy, finite and not restartable. It ends after `Done` (or
/// when the provider closes the connection) and reports failures as `Err`
/// items, never as text. Implementations do not retry.
pub trait GenerationProvider: Send + Sync {
    /// Human-readable provider name (e.g., "gemini").
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Open a streaming generation.
    fn stream(&self, request: GenerationRequest) -> GenerationStream;
}
