//! Conversation management outside of the turn pipeline.
//!
//! Listing, explicit creation, renaming, soft deletion and rewinding of
//! conversations. Every operation is scoped to the calling user.

use forge_types::chat::{normalize_title, ChatMessage, Conversation, ConversationSetup};
use forge_types::error::ConversationError;
use forge_types::user::UserId;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::conversation::repository::ConversationRepository;

/// Title used when a conversation is created without one.
pub const UNTITLED: &str = "New Adventure";

/// A conversation together with its ordered active messages.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

/// Generic over `ConversationRepository` so forge-core never depends on forge-infra.
pub struct ConversationService<C: ConversationRepository> {
    repo: C,
}

impl<C: ConversationRepository> ConversationService<C> {
    pub fn new(repo: C) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &C {
        &self.repo
    }

    /// Create a conversation through the explicit setup flow.
    pub async fn create(
        &self,
        user_id: UserId,
        title: Option<&str>,
        setup: ConversationSetup,
    ) -> Result<Conversation, ConversationError> {
        let title = title
            .and_then(normalize_title)
            .unwrap_or_else(|| UNTITLED.to_string());
        let conversation = Conversation::new(user_id, title).with_setup(setup);
        let created = self.repo.create_conversation(&conversation).await?;
        info!(user_id = %user_id, conversation_id = %created.id, "Conversation created");
        Ok(created)
    }

    pub async fn list(&self, user_id: &UserId) -> Result<Vec<Conversation>, ConversationError> {
        Ok(self.repo.list_active(user_id).await?)
    }

    /// Fetch an owned conversation with its full active history.
    pub async fn detail(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
    ) -> Result<ConversationDetail, ConversationError> {
        let conversation = self
            .repo
            .get_active_conversation(user_id, conversation_id)
            .await?
            .ok_or(ConversationError::NotFound)?;
        let messages = self.repo.list_history(conversation_id, None).await?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    /// Rename a conversation; the title is trimmed and capped.
    pub async fn rename(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        title: &str,
    ) -> Result<String, ConversationError> {
        let title = normalize_title(title).ok_or(ConversationError::EmptyTitle)?;
        self.repo.rename(user_id, conversation_id, &title).await?;
        info!(conversation_id = %conversation_id, "Conversation renamed");
        Ok(title)
    }

    pub async fn update_setup(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        setup: &ConversationSetup,
    ) -> Result<(), ConversationError> {
        self.repo
            .update_setup(user_id, conversation_id, setup)
            .await?;
        Ok(())
    }

    /// Soft-delete a conversation; it disappears from listings.
    pub async fn delete(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
    ) -> Result<(), ConversationError> {
        self.repo.deactivate(user_id, conversation_id).await?;
        info!(user_id = %user_id, conversation_id = %conversation_id, "Conversation deactivated");
        Ok(())
    }

    /// Rewind: deactivate a message and everything after it.
    ///
    /// Ownership is checked through the conversation first. Rewinding an
    /// already-deactivated message succeeds and deactivates nothing.
    pub async fn rewind(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        message_id: &Uuid,
    ) -> Result<u64, ConversationError> {
        self.repo
            .get_message(user_id, conversation_id, message_id)
            .await?
            .ok_or(ConversationError::MessageNotFound)?;

        let deleted = self.repo.soft_delete_from(conversation_id, message_id).await?;
        info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            deleted,
            "Conversation rewound"
        );
        Ok(deleted)
    }
}
