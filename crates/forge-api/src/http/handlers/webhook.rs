//! Payment webhook receiver.
//!
//! POST /api/v1/webhooks/payments
//!
//! The raw body is verified against the `Stripe-Signature` header before it
//! is parsed. Verified events are acknowledged with 200 whatever their
//! outcome, so the sender does not retry events we deliberately ignore.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use secrecy::ExposeSecret;
use tracing::warn;

use forge_infra::payment::{parse_event, verify_signature, SIGNATURE_HEADER};
use forge_types::error::PaymentError;
use forge_types::ledger::PaymentOutcome;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

pub async fn receive_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<PaymentOutcome>>, AppError> {
    let timer = RequestTimer::start();

    let Some(secret) = state.webhook_secret.as_ref() else {
        warn!("Payment webhook received but no webhook secret is configured");
        return Err(PaymentError::NotConfigured.into());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(PaymentError::MissingSignature)?;

    verify_signature(
        secret.expose_secret().as_bytes(),
        &body,
        signature,
        chrono::Utc::now().timestamp(),
        state.config.payments.signature_tolerance_secs,
    )
    .inspect_err(|e| warn!(error = %e, payload_len = body.len(), "Rejected payment webhook"))?;

    let event = parse_event(&body)?;
    let outcome = state.payment_service.handle_event(&event).await?;
    Ok(timer.respond(outcome))
}
