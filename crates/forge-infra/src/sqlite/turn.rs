//! SQLite implementation of the turn store.
//!
//! Each method is one transaction on the writer connection. `begin_turn`
//! commits the user message before generation starts; `finalize_turn`
//! commits the debit and the assistant message together or not at all.
//! Rewind and delete also write on the writer connection, so the activity
//! check at the start of finalize cannot interleave with them.

use sqlx::sqlite::SqliteConnection;

use forge_core::turn::store::{BeginTurn, BegunTurn, FinalizeTurn, FinalizedTurn, TurnStore};
use forge_types::chat::{ChatMessage, Conversation, MessageRole};
use forge_types::error::{FinalizeError, RepositoryError};
use forge_types::turn::ConversationTarget;

use super::conversation::{
    append_message_in, find_active_conversation_in, insert_conversation, most_recent_active_in,
};
use super::ledger::debit_in;
use super::pool::{query_err, DatabasePool};

#[derive(Clone)]
pub struct SqliteTurnStore {
    pool: DatabasePool,
}

impl SqliteTurnStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

async fn resolve_target(
    conn: &mut SqliteConnection,
    turn: &BeginTurn,
) -> Result<Conversation, RepositoryError> {
    let found = match turn.target {
        ConversationTarget::Existing(id) => {
            find_active_conversation_in(conn, &turn.user_id, &id).await?
        }
        ConversationTarget::MostRecent => most_recent_active_in(conn, &turn.user_id).await?,
        ConversationTarget::New => {
            let conversation = Conversation::new(turn.user_id, turn.new_title.clone());
            Some(insert_conversation(conn, &conversation).await?)
        }
    };
    found.ok_or(RepositoryError::NotFound)
}

/// True while the turn's user message and its conversation are both active.
async fn turn_still_active(
    conn: &mut SqliteConnection,
    turn: &FinalizeTurn,
) -> Result<bool, RepositoryError> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"SELECT 1 FROM chat_messages m
           JOIN conversations c ON c.id = m.conversation_id
           WHERE m.id = ? AND m.conversation_id = ? AND m.is_active = 1
             AND c.user_id = ? AND c.is_active = 1"#,
    )
    .bind(turn.user_message_id.to_string())
    .bind(turn.conversation_id.to_string())
    .bind(turn.user_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(query_err)?;

    Ok(found.is_some())
}

impl TurnStore for SqliteTurnStore {
    async fn begin_turn(&self, turn: &BeginTurn) -> Result<BegunTurn, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let mut conversation = resolve_target(&mut tx, turn).await?;
        let user_message = append_message_in(
            &mut tx,
            &ChatMessage::new(conversation.id, MessageRole::User, turn.prompt.clone()),
        )
        .await?;
        conversation.updated_at = user_message.created_at;

        tx.commit().await.map_err(query_err)?;
        Ok(BegunTurn {
            conversation,
            user_message,
        })
    }

    async fn finalize_turn(&self, turn: &FinalizeTurn) -> Result<FinalizedTurn, FinalizeError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| FinalizeError::StorageError(e.to_string()))?;

        // Dropping `tx` on any early return rolls back the debit.
        if !turn_still_active(&mut tx, turn).await? {
            return Err(FinalizeError::Superseded);
        }
        let credits_remaining = debit_in(&mut tx, &turn.user_id).await?;

        let mut message =
            ChatMessage::new(turn.conversation_id, MessageRole::Assistant, turn.content.clone());
        if let Some(usage) = turn.usage {
            message.prompt_tokens = Some(usage.prompt_tokens);
            message.completion_tokens = Some(usage.completion_tokens);
            message.total_tokens = Some(usage.total_tokens);
        }
        let assistant_message = append_message_in(&mut tx, &message).await?;

        tx.commit()
            .await
            .map_err(|e| FinalizeError::StorageError(e.to_string()))?;

        Ok(FinalizedTurn {
            assistant_message,
            credits_remaining,
        })
    }
}
