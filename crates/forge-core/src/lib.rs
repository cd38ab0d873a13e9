//! Business logic and repository trait definitions for Adventure Forge.
//!
//! This crate defines the "ports" (repository and provider traits) that the
//! infrastructure layer implements, and the turn orchestrator that drives a
//! chat turn through them. It depends only on `forge-types` -- never on
//! `forge-infra` or any database/IO crate.

pub mod conversation;
pub mod ledger;
pub mod llm;
pub mod turn;
