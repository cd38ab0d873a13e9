//! Types describing a single chat turn as seen by callers of the
//! turn orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TurnError;

/// Which conversation a turn is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ConversationTarget {
    /// An existing conversation, which must be active and owned by the caller.
    Existing(Uuid),
    /// The caller's most recently updated active conversation; rejected if none exists.
    MostRecent,
    /// A fresh conversation titled from the prompt.
    New,
}

impl ConversationTarget {
    /// Resolve the wire-level pair `(conversation_id?, new?)`.
    ///
    /// An explicit id always wins over the `new` flag.
    pub fn from_request(conversation_id: Option<Uuid>, new: bool) -> Self {
        match (conversation_id, new) {
            (Some(id), _) => ConversationTarget::Existing(id),
            (None, true) => ConversationTarget::New,
            (None, false) => ConversationTarget::MostRecent,
        }
    }
}

/// Marker emitted after the last fragment of a finalized turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCompletion {
    pub conversation_id: Uuid,
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
    pub credits_remaining: i64,
}

/// Events delivered to the caller while a turn streams.
///
/// A turn yields zero or more `Fragment`s followed by exactly one of
/// `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Fragment { text: String },
    Failed { code: String, message: String },
    Completed(TurnCompletion),
}

impl TurnEvent {
    pub fn failed(err: &TurnError) -> Self {
        TurnEvent::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// True for the final event of a turn.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Fragment { .. })
    }
}

/// Why a turn ended without persisting an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    ProviderError,
    Timeout,
    Cancelled,
    EmptyGeneration,
    InsufficientCredit,
    /// The user message was rewound or the conversation deleted mid-stream.
    Superseded,
    PersistenceError,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscardReason::ProviderError => "provider_error",
            DiscardReason::Timeout => "timeout",
            DiscardReason::Cancelled => "cancelled",
            DiscardReason::EmptyGeneration => "empty_generation",
            DiscardReason::InsufficientCredit => "insufficient_credit",
            DiscardReason::Superseded => "superseded",
            DiscardReason::PersistenceError => "persistence_error",
        };
        f.write_str(s)
    }
}

/// Terminal state of a turn once streaming has begun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Finalized(TurnCompletion),
    Discarded(DiscardReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_request() {
        let id = Uuid::now_v7();
        assert_eq!(
            ConversationTarget::from_request(Some(id), true),
            ConversationTarget::Existing(id)
        );
        assert_eq!(ConversationTarget::from_request(None, true), ConversationTarget::New);
        assert_eq!(
            ConversationTarget::from_request(None, false),
            ConversationTarget::MostRecent
        );
    }

    #[test]
    fn test_completion_serializes_camel_case() {
        let completion = TurnCompletion {
            conversation_id: Uuid::nil(),
            user_message_id: Uuid::nil(),
            assistant_message_id: Uuid::nil(),
            credits_remaining: 2,
        };
        let json = serde_json::to_value(&completion).unwrap();
        assert!(json.get("userMessageId").is_some());
        assert!(json.get("assistantMessageId").is_some());
        assert_eq!(json["creditsRemaining"], 2);
    }

    #[test]
    fn test_failed_event_carries_code() {
        let event = TurnEvent::failed(&TurnError::EmptyGeneration);
        match &event {
            TurnEvent::Failed { code, .. } => assert_eq!(code, "EMPTY_GENERATION"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(event.is_terminal());
        assert!(!TurnEvent::Fragment { text: "x".into() }.is_terminal());
    }
}
