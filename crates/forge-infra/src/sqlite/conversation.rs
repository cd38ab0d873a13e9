//! SQLite conversation repository implementation.
//!
//! Implements `ConversationRepository` from `forge-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, reads on the reader
//! pool and every write on the single writer connection.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use uuid::Uuid;

use forge_core::conversation::repository::ConversationRepository;
use forge_types::chat::{ChatMessage, Conversation, ConversationSetup, MessageRole};
use forge_types::error::RepositoryError;
use forge_types::user::UserId;

use super::pool::{format_datetime, parse_datetime, query_err, truncate_micros, DatabasePool};

/// SQLite-backed implementation of `ConversationRepository`.
#[derive(Clone)]
pub struct SqliteConversationRepository {
    pool: DatabasePool,
}

impl SqliteConversationRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

/// Internal row type for mapping SQLite rows to domain Conversation.
pub(crate) struct ConversationRow {
    id: String,
    user_id: String,
    title: String,
    is_active: bool,
    context_data: Option<String>,
    system_prompt_override: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ConversationRow {
    pub(crate) fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            is_active: row.try_get("is_active")?,
            context_data: row.try_get("context_data")?,
            system_prompt_override: row.try_get("system_prompt_override")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub(crate) fn into_conversation(self) -> Result<Conversation, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation id: {e}")))?;
        let user_id = Uuid::parse_str(&self.user_id)
            .map_err(|e| RepositoryError::Query(format!("invalid user_id: {e}")))?;
        let context = self
            .context_data
            .as_deref()
            .map(serde_json::from_str::<BTreeMap<String, String>>)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid context_data: {e}")))?;

        Ok(Conversation {
            id,
            user_id: UserId::from_uuid(user_id),
            title: self.title,
            is_active: self.is_active,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            context,
            system_override: self.system_prompt_override,
        })
    }
}

/// Internal row type for mapping SQLite rows to domain ChatMessage.
pub(crate) struct ChatMessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    created_at: String,
    is_active: bool,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
}

impl ChatMessageRow {
    pub(crate) fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            is_active: row.try_get("is_active")?,
            prompt_tokens: row.try_get("prompt_tokens")?,
            completion_tokens: row.try_get("completion_tokens")?,
            total_tokens: row.try_get("total_tokens")?,
        })
    }

    pub(crate) fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let conversation_id = Uuid::parse_str(&self.conversation_id)
            .map_err(|e| RepositoryError::Query(format!("invalid conversation_id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(ChatMessage {
            id,
            conversation_id,
            role,
            content: self.content,
            created_at: parse_datetime(&self.created_at)?,
            is_active: self.is_active,
            prompt_tokens: self.prompt_tokens.map(|v| v as u32),
            completion_tokens: self.completion_tokens.map(|v| v as u32),
            total_tokens: self.total_tokens.map(|v| v as u32),
        })
    }
}

fn map_conversation(row: &sqlx::sqlite::SqliteRow) -> Result<Conversation, RepositoryError> {
    ConversationRow::from_row(row)
        .map_err(query_err)?
        .into_conversation()
}

fn map_message(row: &sqlx::sqlite::SqliteRow) -> Result<ChatMessage, RepositoryError> {
    ChatMessageRow::from_row(row).map_err(query_err)?.into_message()
}

fn encode_context(
    context: &Option<BTreeMap<String, String>>,
) -> Result<Option<String>, RepositoryError> {
    context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| RepositoryError::Query(format!("invalid context: {e}")))
}

// ---------------------------------------------------------------------------
// Unit-of-work helpers shared with the turn store
// ---------------------------------------------------------------------------

pub(crate) async fn insert_conversation(
    conn: &mut SqliteConnection,
    conversation: &Conversation,
) -> Result<Conversation, RepositoryError> {
    let mut stored = conversation.clone();
    stored.created_at = truncate_micros(conversation.created_at);
    stored.updated_at = truncate_micros(conversation.updated_at);

    sqlx::query(
        r#"INSERT INTO conversations (id, user_id, title, is_active, context_data, system_prompt_override, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(stored.id.to_string())
    .bind(stored.user_id.to_string())
    .bind(&stored.title)
    .bind(stored.is_active)
    .bind(encode_context(&stored.context)?)
    .bind(&stored.system_override)
    .bind(format_datetime(&stored.created_at))
    .bind(format_datetime(&stored.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    Ok(stored)
}

/// Insert a message with a timestamp strictly after every earlier message
/// of its conversation, and bump the conversation's `updated_at`.
///
/// `RepositoryError::NotFound` when the conversation is missing or
/// deactivated; the caller's transaction must then be rolled back.
///
/// Must run on the writer connection (or a transaction on it) so the
/// read of the latest timestamp and the insert are not interleaved with
/// another append.
pub(crate) async fn append_message_in(
    conn: &mut SqliteConnection,
    message: &ChatMessage,
) -> Result<ChatMessage, RepositoryError> {
    let last: Option<String> =
        sqlx::query_scalar("SELECT MAX(created_at) FROM chat_messages WHERE conversation_id = ?")
            .bind(message.conversation_id.to_string())
            .fetch_one(&mut *conn)
            .await
            .map_err(query_err)?;

    let mut created_at = truncate_micros(Utc::now());
    if let Some(last) = last {
        let last = parse_datetime(&last)?;
        if created_at <= last {
            created_at = last + Duration::microseconds(1);
        }
    }

    let mut stored = message.clone();
    stored.created_at = created_at;
    let created_at = format_datetime(&created_at);

    sqlx::query(
        r#"INSERT INTO chat_messages (id, conversation_id, role, content, created_at, is_active, prompt_tokens, completion_tokens, total_tokens)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(stored.id.to_string())
    .bind(stored.conversation_id.to_string())
    .bind(stored.role.to_string())
    .bind(&stored.content)
    .bind(&created_at)
    .bind(stored.is_active)
    .bind(stored.prompt_tokens.map(i64::from))
    .bind(stored.completion_tokens.map(i64::from))
    .bind(stored.total_tokens.map(i64::from))
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    let result =
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ? AND is_active = 1")
        .bind(&created_at)
        .bind(stored.conversation_id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(query_err)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }

    Ok(stored)
}

pub(crate) async fn find_active_conversation_in(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    conversation_id: &Uuid,
) -> Result<Option<Conversation>, RepositoryError> {
    let row = sqlx::query("SELECT * FROM conversations WHERE id = ? AND user_id = ? AND is_active = 1")
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?;

    row.as_ref().map(map_conversation).transpose()
}

pub(crate) async fn most_recent_active_in(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<Option<Conversation>, RepositoryError> {
    let row = sqlx::query(
        "SELECT * FROM conversations WHERE user_id = ? AND is_active = 1 ORDER BY updated_at DESC, id DESC LIMIT 1",
    )
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(query_err)?;

    row.as_ref().map(map_conversation).transpose()
}

// ---------------------------------------------------------------------------
// ConversationRepository implementation
// ---------------------------------------------------------------------------

impl ConversationRepository for SqliteConversationRepository {
    async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        insert_conversation(&mut conn, conversation).await
    }

    async fn get_active_conversation(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(query_err)?;
        find_active_conversation_in(&mut conn, user_id, conversation_id).await
    }

    async fn most_recent_active(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(query_err)?;
        most_recent_active_in(&mut conn, user_id).await
    }

    async fn list_active(&self, user_id: &UserId) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ? AND is_active = 1 ORDER BY updated_at DESC, id DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(map_conversation).collect()
    }

    async fn rename(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        title: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?, updated_at = ? WHERE id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(title)
        .bind(format_datetime(&Utc::now()))
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_setup(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        setup: &ConversationSetup,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE conversations SET context_data = ?, system_prompt_override = ?, updated_at = ?
               WHERE id = ? AND user_id = ? AND is_active = 1"#,
        )
        .bind(encode_context(&setup.context)?)
        .bind(&setup.system_override)
        .bind(format_datetime(&Utc::now()))
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn deactivate(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversations SET is_active = 0, updated_at = ? WHERE id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(format_datetime(&Utc::now()))
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<ChatMessage, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let stored = append_message_in(&mut tx, message).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(stored)
    }

    async fn list_history(
        &self,
        conversation_id: &Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    r#"SELECT * FROM (
                           SELECT * FROM chat_messages
                           WHERE conversation_id = ? AND is_active = 1
                           ORDER BY created_at DESC, id DESC
                           LIMIT ?
                       ) ORDER BY created_at ASC, id ASC"#,
                )
                .bind(conversation_id.to_string())
                .bind(i64::from(limit))
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM chat_messages WHERE conversation_id = ? AND is_active = 1 ORDER BY created_at ASC, id ASC",
                )
                .bind(conversation_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_err)?;

        rows.iter().map(map_message).collect()
    }

    async fn get_message(
        &self,
        user_id: &UserId,
        conversation_id: &Uuid,
        message_id: &Uuid,
    ) -> Result<Option<ChatMessage>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT m.* FROM chat_messages m
               JOIN conversations c ON c.id = m.conversation_id
               WHERE m.id = ? AND m.conversation_id = ? AND c.user_id = ? AND c.is_active = 1"#,
        )
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(map_message).transpose()
    }

    async fn soft_delete_from(
        &self,
        conversation_id: &Uuid,
        message_id: &Uuid,
    ) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let result = sqlx::query(
            r#"UPDATE chat_messages SET is_active = 0
               WHERE conversation_id = ? AND is_active = 1
                 AND created_at >= (SELECT created_at FROM chat_messages WHERE id = ? AND conversation_id = ?)"#,
        )
        .bind(conversation_id.to_string())
        .bind(message_id.to_string())
        .bind(conversation_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(format_datetime(&Utc::now()))
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;

    async fn insert_user(pool: &DatabasePool) -> UserId {
        let id = UserId::new();
        let now = format_datetime(&Utc::now());
        sqlx::query(
            "INSERT INTO users (id, external_id, email, credits, created_at, updated_at) VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(id.to_string())
        .bind(format!("ext-{id}"))
        .bind("gm@example.com")
        .bind(&now)
        .bind(&now)
        .execute(&pool.writer)
        .await
        .unwrap();
        id
    }

    async fn setup() -> (SqliteConversationRepository, UserId, Conversation) {
        let pool = test_pool().await;
        let user_id = insert_user(&pool).await;
        let repo = SqliteConversationRepository::new(pool);
        let conversation = repo
            .create_conversation(&Conversation::new(user_id, "The Sunken Keep"))
            .await
            .unwrap();
        (repo, user_id, conversation)
    }

    async fn append(
        repo: &SqliteConversationRepository,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> ChatMessage {
        repo.append_message(&ChatMessage::new(conversation_id, role, content))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_active_conversation() {
        let (repo, user_id, conversation) = setup().await;

        let found = repo
            .get_active_conversation(&user_id, &conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.title, "The Sunken Keep");
        assert!(found.is_active);
        assert!(found.context.is_none());
    }

    #[tokio::test]
    async fn test_get_active_conversation_filters_owner() {
        let (repo, _user_id, conversation) = setup().await;
        let stranger = insert_user(&repo.pool).await;

        let found = repo
            .get_active_conversation(&stranger, &conversation.id)
            .await
            .unwrap();
        assert!(found.is_none(), "another user's conversation must not be returned");
    }

    #[tokio::test]
    async fn test_deactivated_conversation_is_hidden() {
        let (repo, user_id, conversation) = setup().await;

        repo.deactivate(&user_id, &conversation.id).await.unwrap();

        assert!(repo
            .get_active_conversation(&user_id, &conversation.id)
            .await
            .unwrap()
            .is_none());
        assert!(repo.list_active(&user_id).await.unwrap().is_empty());
        assert!(matches!(
            repo.deactivate(&user_id, &conversation.id).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_append_bumps_updated_at_and_orders_recent_first() {
        let (repo, user_id, first) = setup().await;
        let second = repo
            .create_conversation(&Conversation::new(user_id, "Second"))
            .await
            .unwrap();

        // Appending to the older conversation moves it to the top.
        let message = append(&repo, first.id, MessageRole::User, "hello").await;

        let listed = repo.list_active(&user_id).await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert_eq!(listed[0].updated_at, message.created_at);

        let recent = repo.most_recent_active(&user_id).await.unwrap().unwrap();
        assert_eq!(recent.id, first.id);
    }

    #[tokio::test]
    async fn test_append_timestamps_strictly_increase() {
        let (repo, _user_id, conversation) = setup().await;

        let mut previous = None;
        for i in 0..25 {
            let role = if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant };
            let message = append(&repo, conversation.id, role, &format!("m{i}")).await;
            if let Some(prev) = previous {
                assert!(message.created_at > prev);
            }
            previous = Some(message.created_at);
        }
    }

    #[tokio::test]
    async fn test_list_history_limit_returns_most_recent_ascending() {
        let (repo, _user_id, conversation) = setup().await;
        for i in 0..5 {
            append(&repo, conversation.id, MessageRole::User, &format!("m{i}")).await;
        }

        let all = repo.list_history(&conversation.id, None).await.unwrap();
        assert_eq!(all.len(), 5);

        let recent = repo.list_history(&conversation.id, Some(2)).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_soft_delete_from_is_a_rewind_and_idempotent() {
        let (repo, user_id, conversation) = setup().await;
        let m0 = append(&repo, conversation.id, MessageRole::User, "one").await;
        let m1 = append(&repo, conversation.id, MessageRole::Assistant, "two").await;
        let _m2 = append(&repo, conversation.id, MessageRole::User, "three").await;
        let _m3 = append(&repo, conversation.id, MessageRole::Assistant, "four").await;

        let deleted = repo.soft_delete_from(&conversation.id, &m1.id).await.unwrap();
        assert_eq!(deleted, 3);

        let history = repo.list_history(&conversation.id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, m0.id);

        let again = repo.soft_delete_from(&conversation.id, &m1.id).await.unwrap();
        assert_eq!(again, 0);

        // The deactivated message is still addressable for ownership checks.
        let found = repo
            .get_message(&user_id, &conversation.id, &m1.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!found.is_active);
    }

    #[tokio::test]
    async fn test_history_after_rewind_keeps_order_with_new_messages() {
        let (repo, _user_id, conversation) = setup().await;
        let _a = append(&repo, conversation.id, MessageRole::User, "a").await;
        let b = append(&repo, conversation.id, MessageRole::Assistant, "b").await;
        repo.soft_delete_from(&conversation.id, &b.id).await.unwrap();
        let _c = append(&repo, conversation.id, MessageRole::Assistant, "c").await;

        let history = repo.list_history(&conversation.id, None).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "c"]);
        assert!(history[0].created_at < history[1].created_at);
    }

    #[tokio::test]
    async fn test_rename_and_setup() {
        let (repo, user_id, conversation) = setup().await;

        repo.rename(&user_id, &conversation.id, "Dragon's Lair")
            .await
            .unwrap();

        let mut context = BTreeMap::new();
        context.insert("game_system".to_string(), "5e".to_string());
        let setup = ConversationSetup {
            context: Some(context.clone()),
            system_override: Some("Speak like a bard.".to_string()),
        };
        repo.update_setup(&user_id, &conversation.id, &setup)
            .await
            .unwrap();

        let found = repo
            .get_active_conversation(&user_id, &conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.title, "Dragon's Lair");
        assert_eq!(found.context, Some(context));
        assert_eq!(found.system_override.as_deref(), Some("Speak like a bard."));
    }

    #[tokio::test]
    async fn test_rename_foreign_conversation_not_found() {
        let (repo, _user_id, conversation) = setup().await;
        let stranger = insert_user(&repo.pool).await;

        let result = repo.rename(&stranger, &conversation.id, "Mine now").await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }
}
