//! Generation provider abstractions for Adventure Forge.
//!
//! - `GenerationProvider`: object-safe trait for streaming backends
//! - `ScriptedProvider`: in-process provider replaying fixed scripts

pub mod provider;
pub mod scripted;
