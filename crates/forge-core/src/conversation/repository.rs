//! ConversationRepository trait definition.
//!
//! Every lookup that starts from a user-supplied id also takes the owning
//! `UserId`, so implementations can never hand back another user's thread.

use forge_types::chat::{ChatMessage, Conversation, ConversationSetup};
use forge_types::error::RepositoryError;
use forge_types::user::UserId;
use uuid::Uuid;

/// Repository trait for conversation and message persistence.
///
/// Implementations live in forge-infra (e.g., `SqliteConversationRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ConversationRepository: Send + Sync {
    /// Insert a new conversation.
    fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> impl std::future::Future<Output = Result<Conversation, RepositoryError>> + Send;

    /// Get a conversation only if it is active and owned by `user_id`.
    fn get_active_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// The user's active conversation with the latest `updated_at`.
    fn most_recent_active(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<Option<Conversation>, RepositoryError>> + Send;

    /// Active conversations of a user, most recently updated first.
    fn list_active(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<Vec<Conversation>, RepositoryError>> + Send;

    /// Set the title of an owned, active conversation.
    ///
    /// Returns `RepositoryError::NotFound` when nothing matched.
    fn rename(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        title: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the context and system override of an owned, active conversation.
    fn update_setup(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        setup: &ConversationSetup,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Soft-delete a conversation (`is_active = false`).
    fn deactivate(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Append a message and bump the conversation's `updated_at` in one unit of work.
    ///
    /// The stored timestamp is strictly greater than every earlier message
    /// in the same conversation; the returned message carries it.
    fn append_message(
        &self,
        message: &ChatMessage,
    ) -> impl std::future::Future<Output = Result<ChatMessage, RepositoryError>> + Send;

    /// Active messages in ascending timestamp order.
    ///
    /// With a limit, the most recent `limit` messages are returned, still ascending.
    fn list_history(
        &self,
        conversation_id: &Uuid,
        limit: Option<u32>,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, RepositoryError>> + Send;

    /// Get a message (active or not) inside an owned, active conversation.
    fn get_message(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        message_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ChatMessage>, RepositoryError>> + Send;

    /// Deactivate the message and every active message at or after its timestamp.
    ///
    /// Returns the number of messages deactivated; repeating the call returns 0.
    fn soft_delete_from(
        &self,
        conversation_id: &Uuid,
        message_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
