//! Infrastructure layer for Adventure Forge.
//!
//! Contains implementations of the ports defined in `forge-core`: SQLite
//! storage for conversations, credits and turns, the Gemini generation
//! provider, configuration loading and payment webhook verification.

pub mod config;
pub mod crypto;
pub mod llm;
pub mod payment;
pub mod sqlite;

#[cfg(test)]
mod turn_pipeline_tests;
