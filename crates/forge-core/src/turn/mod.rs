//! The chat-turn pipeline.
//!
//! `TurnStore` defines the two units of work of a turn; `TurnOrchestrator`
//! drives a turn from the credit pre-check to finalize.

pub mod orchestrator;
pub mod store;
