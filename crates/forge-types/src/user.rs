use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Unique identifier for a user row, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new UserId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a UserId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identity yielded by the external principal resolver.
///
/// `external_id` is opaque and stable across sessions; it is the only
/// thing the ledger and store key on when a user is first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub external_id: String,
    pub email: Option<String>,
}

impl Principal {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Email to store for a newly created user.
    ///
    /// Falls back to a non-routable placeholder when the resolver gave none.
    pub fn email_or_placeholder(&self) -> String {
        match &self.email {
            Some(email) if !email.trim().is_empty() => email.trim().to_string(),
            _ => format!("user_{}@placeholder.invalid", self.external_id),
        }
    }
}

/// A user and their prepaid credit balance.
///
/// Created lazily on first authenticated contact with a zero balance.
/// The balance is only ever changed through the credit ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub external_id: String,
    pub email: String,
    pub credits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build a brand-new user with no credit.
    pub fn new_from_principal(principal: &Principal) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            external_id: principal.external_id.clone(),
            email: principal.email_or_placeholder(),
            credits: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
