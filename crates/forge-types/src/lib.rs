//! Shared domain types for Adventure Forge.
//!
//! Users and their credit balance, conversations and messages, generation
//! stream events, turn events, configuration, and the error enums shared by
//! every other crate.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod payment;
pub mod turn;
pub mod user;
