//! Observability setup for Adventure Forge: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
