use thiserror::Error;

/// Errors from repository operations (used by trait definitions in forge-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from conversation management (listing, renaming, rewinding).
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found")]
    NotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("title must not be empty")]
    EmptyTitle,

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<RepositoryError> for ConversationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => ConversationError::NotFound,
            other => ConversationError::StorageError(other.to_string()),
        }
    }
}

/// Errors related to credit ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient credit")]
    InsufficientCredit,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<RepositoryError> for LedgerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => LedgerError::UserNotFound,
            other => LedgerError::StorageError(other.to_string()),
        }
    }
}

/// Errors from verifying an inbound payment notification.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header: {0}")]
    MalformedSignature(String),

    #[error("signature mismatch")]
    InvalidSignature,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("webhook secret not configured")]
    NotConfigured,
}

/// Failure taxonomy of a chat turn.
///
/// The first three are raised before anything is persisted; the rest
/// happen after the user message has been committed.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("Payment Required: Insufficient credits.")]
    InsufficientCredit,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("generation failed: {0}")]
    ProviderError(String),

    #[error("generation produced no content")]
    EmptyGeneration,

    #[error("turn superseded: its message was rewound or its conversation deleted")]
    Superseded,

    #[error("storage error: {0}")]
    PersistenceError(String),
}

impl TurnError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::Unauthenticated => "UNAUTHORIZED",
            TurnError::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            TurnError::InsufficientCredit => "INSUFFICIENT_CREDIT",
            TurnError::InvalidRequest(_) => "VALIDATION_ERROR",
            TurnError::ProviderError(_) => "PROVIDER_ERROR",
            TurnError::EmptyGeneration => "EMPTY_GENERATION",
            TurnError::Superseded => "TURN_SUPERSEDED",
            TurnError::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<RepositoryError> for TurnError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => TurnError::ConversationNotFound,
            other => TurnError::PersistenceError(other.to_string()),
        }
    }
}

impl From<LedgerError> for TurnError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredit => TurnError::InsufficientCredit,
            other => TurnError::PersistenceError(other.to_string()),
        }
    }
}

/// Errors from committing a finished turn.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("insufficient credit")]
    InsufficientCredit,

    /// The turn's user message or its conversation is no longer active.
    #[error("turn superseded")]
    Superseded,

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<LedgerError> for FinalizeError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientCredit => FinalizeError::InsufficientCredit,
            other => FinalizeError::StorageError(other.to_string()),
        }
    }
}

impl From<RepositoryError> for FinalizeError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => FinalizeError::Superseded,
            other => FinalizeError::StorageError(other.to_string()),
        }
    }
}
