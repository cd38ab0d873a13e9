//! Current user endpoint.

use axum::Json;
use serde::Serialize;

use forge_types::ledger::CreditCheck;
use forge_types::user::UserId;

use crate::http::error::AppError;
use crate::http::extractors::auth::CurrentUser;
use crate::http::response::{ApiResponse, RequestTimer};

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: UserId,
    pub external_id: String,
    pub email: String,
    pub credits: i64,
    /// Whether a turn would pass the credit pre-check right now.
    pub can_chat: bool,
}

/// GET /api/v1/me - Identity and credit balance of the caller.
pub async fn get_me(
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<MeResponse>>, AppError> {
    let timer = RequestTimer::start();
    let check = CreditCheck::from_balance(user.credits);

    Ok(Json(
        timer
            .envelope(MeResponse {
                id: user.id,
                external_id: user.external_id,
                email: user.email,
                credits: user.credits,
                can_chat: check.allowed,
            })
            .with_link("conversations", "/api/v1/conversations"),
    ))
}
