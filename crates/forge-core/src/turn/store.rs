//! TurnStore trait: the two units of work of a chat turn.
//!
//! `begin_turn` commits the user's message before any provider call.
//! `finalize_turn` runs after a successful stream and commits the
//! assistant message together with the one-credit debit, or nothing.

use forge_types::chat::{ChatMessage, Conversation};
use forge_types::error::{FinalizeError, RepositoryError};
use forge_types::llm::Usage;
use forge_types::turn::ConversationTarget;
use forge_types::user::UserId;
use uuid::Uuid;

/// Input of the first unit of work.
#[derive(Debug, Clone)]
pub struct BeginTurn {
    pub user_id: UserId,
    pub target: ConversationTarget,
    pub prompt: String,
    /// Title used when `target` is `New`.
    pub new_title: String,
}

/// Committed result of the first unit of work.
#[derive(Debug, Clone)]
pub struct BegunTurn {
    pub conversation: Conversation,
    pub user_message: ChatMessage,
}

/// Input of the finalize unit of work.
#[derive(Debug, Clone)]
pub struct FinalizeTurn {
    pub user_id: UserId,
    pub conversation_id: Uuid,
    /// The user message this reply answers; must still be active.
    pub user_message_id: Uuid,
    /// Trimmed, non-empty generated text.
    pub content: String,
    pub usage: Option<Usage>,
}

/// Committed result of the finalize unit of work.
#[derive(Debug, Clone)]
pub struct FinalizedTurn {
    pub assistant_message: ChatMessage,
    pub credits_remaining: i64,
}

/// Transactional persistence for the turn pipeline.
///
/// Implementations live in forge-infra (e.g., `SqliteTurnStore`).
pub trait TurnStore: Send + Sync {
    /// Resolve or create the target conversation, append the user message and
    /// bump `updated_at`, all in one committed unit of work.
    ///
    /// `RepositoryError::NotFound` when the target does not resolve to an
    /// active conversation owned by the user.
    fn begin_turn(
        &self,
        turn: &BeginTurn,
    ) -> impl std::future::Future<Output = Result<BegunTurn, RepositoryError>> + Send;

    /// Debit one credit, persist the assistant message and bump the
    /// conversation, committing all effects together.
    ///
    /// `FinalizeError::Superseded` when the user message was rewound or the
    /// conversation deleted while generating, and
    /// `FinalizeError::InsufficientCredit` when the balance is zero at commit
    /// time. In both cases nothing is written.
    fn finalize_turn(
        &self,
        turn: &FinalizeTurn,
    ) -> impl std::future::Future<Output = Result<FinalizedTurn, FinalizeError>> + Send;
}
