//! Payment provider event shapes.
//!
//! Only the fields the ledger top-up needs are modelled; everything else in
//! the provider's payload is ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Event type that signals a finished checkout.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// A verified payment notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    /// Provider-assigned event id; the idempotency key for top-ups.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventData {
    pub object: CheckoutSession,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// External user id passed to checkout by the client.
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
}

impl PaymentEvent {
    /// External user id to credit, if this event is a paid checkout.
    pub fn paid_checkout_reference(&self) -> Option<&str> {
        if self.event_type != CHECKOUT_COMPLETED {
            return None;
        }
        let session = &self.data.object;
        if session.payment_status.as_deref() != Some("paid") {
            return None;
        }
        session
            .client_reference_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}
