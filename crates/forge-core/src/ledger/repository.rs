//! CreditLedger trait definition.
//!
//! The ledger is the only writer of a user's credit balance. The balance
//! never goes below zero: the debit is a conditional update, not a
//! read-then-write.

use forge_types::error::LedgerError;
use forge_types::ledger::{CreditCheck, PaymentOutcome};
use forge_types::user::{Principal, User, UserId};

/// Durable per-user credit balance.
///
/// Implementations live in forge-infra (e.g., `SqliteCreditLedger`).
pub trait CreditLedger: Send + Sync {
    /// Look up the user for a principal, creating it with zero credit on first contact.
    fn get_or_create_user(
        &self,
        principal: &Principal,
    ) -> impl std::future::Future<Output = Result<User, LedgerError>> + Send;

    /// Find a user by the external identity reference.
    fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<User>, LedgerError>> + Send;

    /// Current balance. `LedgerError::UserNotFound` for unknown ids.
    fn balance(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<i64, LedgerError>> + Send;

    /// Advisory pre-check: allowed iff the stored balance is positive.
    ///
    /// Not a reservation; a later debit can still fail.
    fn has_credit(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<CreditCheck, LedgerError>> + Send;

    /// Atomically debit one credit if the balance is positive.
    ///
    /// Returns the new balance, or `LedgerError::InsufficientCredit` when the
    /// balance was already zero. Concurrent callers at balance 1 see exactly
    /// one success.
    fn decrement_if_positive(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<i64, LedgerError>> + Send;

    /// Add `amount` (> 0) credits and return the new balance.
    fn increment(
        &self,
        user_id: &UserId,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<i64, LedgerError>> + Send;

    /// Credit the user referenced by a payment event, once per `event_id`.
    ///
    /// Recording the event id and incrementing happen in one unit of work,
    /// so a redelivered event reports `Duplicate` and changes nothing.
    fn apply_payment(
        &self,
        event_id: &str,
        external_id: &str,
        amount: i64,
    ) -> impl std::future::Future<Output = Result<PaymentOutcome, LedgerError>> + Send;
}
