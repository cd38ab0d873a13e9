//! HTTP/REST API layer for Adventure Forge.
//!
//! Axum-based API at `/api/v1/` with proxy-header identity, envelope
//! responses for JSON endpoints and SSE for chat turns.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;
