//! Google Gemini provider implementation.
//!
//! [`GeminiProvider`] implements
//! [`GenerationProvider`](forge_core::llm::provider::GenerationProvider)
//! over the `streamGenerateContent` SSE endpoint.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::GeminiProvider;
