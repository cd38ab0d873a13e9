//! REST API endpoint handlers.

pub mod conversation;
pub mod me;
pub mod turn;
pub mod webhook;
