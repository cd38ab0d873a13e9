//! Conversation and message persistence abstractions.
//!
//! This module defines the `ConversationRepository` trait that the
//! infrastructure layer implements, and `ConversationService` for the
//! management operations (list, rename, delete, rewind).

pub mod repository;
pub mod service;
