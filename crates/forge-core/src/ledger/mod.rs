//! Credit ledger abstractions and payment top-ups.

pub mod payments;
pub mod repository;
