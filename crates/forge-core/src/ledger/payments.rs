//! Applies verified payment events to the credit ledger.
//!
//! Signature verification happens before an event reaches this service;
//! here we only decide whether the event is a paid checkout and credit the
//! fixed top-up amount once per event id.

use forge_types::error::LedgerError;
use forge_types::ledger::PaymentOutcome;
use forge_types::payment::PaymentEvent;
use tracing::{info, warn};

use crate::ledger::repository::CreditLedger;

pub struct PaymentService<L: CreditLedger> {
    ledger: L,
    credits_per_purchase: i64,
}

impl<L: CreditLedger> PaymentService<L> {
    pub fn new(ledger: L, credits_per_purchase: i64) -> Self {
        Self {
            ledger,
            credits_per_purchase,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub async fn handle_event(&self, event: &PaymentEvent) -> Result<PaymentOutcome, LedgerError> {
        let Some(external_id) = event.paid_checkout_reference() else {
            info!(event_id = %event.id, event_type = %event.event_type, "Ignoring payment event");
            return Ok(PaymentOutcome::Ignored {
                event_type: event.event_type.clone(),
            });
        };

        let outcome = self
            .ledger
            .apply_payment(&event.id, external_id, self.credits_per_purchase)
            .await?;

        match &outcome {
            PaymentOutcome::Credited { user_id, balance } => info!(
                event_id = %event.id,
                user_id = %user_id,
                amount = self.credits_per_purchase,
                balance,
                "Credits added from payment"
            ),
            PaymentOutcome::Duplicate => {
                info!(event_id = %event.id, "Payment event already processed")
            }
            PaymentOutcome::UnknownUser => warn!(
                event_id = %event.id,
                external_id,
                "Paid checkout references an unknown user"
            ),
            PaymentOutcome::Ignored { .. } => {}
        }

        Ok(outcome)
    }
}
