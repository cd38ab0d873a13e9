//! Cryptographic helpers for Adventure Forge.
//!
//! - `signature`: HMAC-SHA256 signatures and constant-time comparison

pub mod signature;
