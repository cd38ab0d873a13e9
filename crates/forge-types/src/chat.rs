//! Conversation and message types for Adventure Forge.
//!
//! A conversation is a titled thread owned by one user; messages are
//! append-only and ordered by their creation timestamp.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::UserId;

/// Maximum stored length of a conversation title, in characters.
pub const TITLE_MAX_CHARS: usize = 150;

/// Author of a chat message.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (role IN ('user', 'assistant'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A conversation thread owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Free-form session parameters (genre, game system, goals...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
    /// Replaces the process-wide system instructions for this thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_override: Option<String>,
}

impl Conversation {
    pub fn new(user_id: UserId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            title: title.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
            context: None,
            system_override: None,
        }
    }

    pub fn with_setup(mut self, setup: ConversationSetup) -> Self {
        self.context = setup.context;
        self.system_override = setup.system_override;
        self
    }

    /// System instructions for a turn in this conversation.
    ///
    /// A non-blank override wins; otherwise the process default applies.
    pub fn effective_system_instructions<'a>(&'a self, default: &'a str) -> &'a str {
        match self.system_override.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => default,
        }
    }
}

/// Optional steering data attached to a conversation at creation or later.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSetup {
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub system_override: Option<String>,
}

/// A single message within a conversation.
///
/// Only assistant messages carry token usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl ChatMessage {
    /// Build a new active message. The store assigns the final timestamp.
    pub fn new(conversation_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            conversation_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            is_active: true,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
        }
    }
}

/// Title for a conversation created implicitly from its first prompt.
///
/// Keeps the first `max_chars` characters and appends `...` when the
/// prompt was longer.
///
/// ```
/// use forge_types::chat::title_from_prompt;
///
/// assert_eq!(title_from_prompt("describe a tavern", 50), "describe a tavern");
/// assert_eq!(title_from_prompt("abcdef", 3), "abc...");
/// ```
pub fn title_from_prompt(prompt: &str, max_chars: usize) -> String {
    let trimmed = prompt.trim();
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head.trim_end())
    } else {
        head
    }
}

/// Validate and normalize a user-supplied conversation title.
///
/// Returns `None` for blank titles; long titles are cut to [`TITLE_MAX_CHARS`].
pub fn normalize_title(title: &str) -> Option<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(TITLE_MAX_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            let parsed: MessageRole = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_message_role_rejects_system() {
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_message_role_serde() {
        let json = serde_json::to_string(&MessageRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_title_from_prompt_truncates_on_char_boundary() {
        let prompt = "é".repeat(60);
        let title = title_from_prompt(&prompt, 50);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("   "), None);
        assert_eq!(normalize_title("  The Sunken Keep "), Some("The Sunken Keep".to_string()));
        let long = "x".repeat(400);
        assert_eq!(normalize_title(&long).unwrap().len(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_effective_system_instructions() {
        let mut conversation = Conversation::new(UserId::new(), "t");
        assert_eq!(conversation.effective_system_instructions("default"), "default");

        conversation.system_override = Some("   ".to_string());
        assert_eq!(conversation.effective_system_instructions("default"), "default");

        conversation.system_override = Some("You are a grim narrator.".to_string());
        assert_eq!(
            conversation.effective_system_instructions("default"),
            "You are a grim narrator."
        );
    }
}
