//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use forge_types::error::{ConversationError, LedgerError, PaymentError, TurnError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Turn(TurnError),
    Conversation(ConversationError),
    Ledger(LedgerError),
    Payment(PaymentError),
    Unauthorized(String),
    Validation(String),
    Internal(String),
}

impl From<TurnError> for AppError {
    fn from(e: TurnError) -> Self {
        AppError::Turn(e)
    }
}

impl From<ConversationError> for AppError {
    fn from(e: ConversationError) -> Self {
        AppError::Conversation(e)
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        AppError::Ledger(e)
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        AppError::Payment(e)
    }
}

impl AppError {
    /// HTTP status, machine-readable code and message for this error.
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Turn(e) => {
                let status = match e {
                    TurnError::Unauthenticated => StatusCode::UNAUTHORIZED,
                    TurnError::ConversationNotFound => StatusCode::NOT_FOUND,
                    TurnError::InsufficientCredit => StatusCode::PAYMENT_REQUIRED,
                    TurnError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    TurnError::Superseded => StatusCode::CONFLICT,
                    TurnError::ProviderError(_) | TurnError::EmptyGeneration => {
                        StatusCode::BAD_GATEWAY
                    }
                    TurnError::PersistenceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.code(), e.to_string())
            }
            AppError::Conversation(e) => match e {
                ConversationError::NotFound => (
                    StatusCode::NOT_FOUND,
                    "CONVERSATION_NOT_FOUND",
                    "Conversation not found".to_string(),
                ),
                ConversationError::MessageNotFound => (
                    StatusCode::NOT_FOUND,
                    "MESSAGE_NOT_FOUND",
                    "Message not found".to_string(),
                ),
                ConversationError::EmptyTitle => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                ConversationError::StorageError(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
                }
            },
            AppError::Ledger(e) => match e {
                LedgerError::InsufficientCredit => (
                    StatusCode::PAYMENT_REQUIRED,
                    "INSUFFICIENT_CREDIT",
                    e.to_string(),
                ),
                LedgerError::UserNotFound => {
                    (StatusCode::NOT_FOUND, "USER_NOT_FOUND", e.to_string())
                }
                LedgerError::InvalidAmount(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                LedgerError::StorageError(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
                }
            },
            AppError::Payment(e) => match e {
                PaymentError::NotConfigured => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "PAYMENTS_NOT_CONFIGURED",
                    e.to_string(),
                ),
                PaymentError::InvalidPayload(_) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
                }
                PaymentError::MissingSignature
                | PaymentError::MalformedSignature(_)
                | PaymentError::InvalidSignature
                | PaymentError::Expired => (
                    StatusCode::BAD_REQUEST,
                    "PAYMENT_SIGNATURE_INVALID",
                    e.to_string(),
                ),
            },
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, status = status.as_u16(), "{message}");
        }

        let body = ApiResponse::failure(code, message, Uuid::now_v7().to_string());
        (status, Json(body)).into_response()
    }
}
