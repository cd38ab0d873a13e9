//! SQLite credit ledger implementation.
//!
//! Balances live in `users.credits` with a `CHECK (credits >= 0)` constraint.
//! Debits are a single conditional `UPDATE ... WHERE credits > 0 RETURNING`,
//! so two racing debits at balance 1 cannot both succeed.

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use uuid::Uuid;

use forge_core::ledger::repository::CreditLedger;
use forge_types::error::LedgerError;
use forge_types::ledger::{CreditCheck, PaymentOutcome};
use forge_types::user::{Principal, User, UserId};

use super::pool::{format_datetime, parse_datetime, DatabasePool};

/// SQLite-backed implementation of `CreditLedger`.
#[derive(Clone)]
pub struct SqliteCreditLedger {
    pool: DatabasePool,
}

impl SqliteCreditLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Internal row type for mapping SQLite rows to domain User.
struct UserRow {
    id: String,
    external_id: String,
    email: String,
    credits: i64,
    created_at: String,
    updated_at: String,
}

impl UserRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            email: row.try_get("email")?,
            credits: row.try_get("credits")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_user(self) -> Result<User, LedgerError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| LedgerError::StorageError(format!("invalid user id: {e}")))?;
        Ok(User {
            id: UserId::from_uuid(id),
            external_id: self.external_id,
            email: self.email,
            credits: self.credits,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn storage_err(e: sqlx::Error) -> LedgerError {
    LedgerError::StorageError(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(ref db_err) = *e {
        return db_err.message().contains("UNIQUE");
    }
    false
}

/// Debit one credit if the balance is positive, on the given connection.
///
/// Shared with the turn store so the debit can join the finalize transaction.
pub(crate) async fn debit_in(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<i64, LedgerError> {
    let remaining: Option<i64> = sqlx::query_scalar(
        "UPDATE users SET credits = credits - 1, updated_at = ? WHERE id = ? AND credits > 0 RETURNING credits",
    )
    .bind(format_datetime(&Utc::now()))
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_err)?;

    if let Some(remaining) = remaining {
        return Ok(remaining);
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage_err)?;

    match exists {
        Some(_) => Err(LedgerError::InsufficientCredit),
        None => Err(LedgerError::UserNotFound),
    }
}

async fn credit_in(
    conn: &mut SqliteConnection,
    user_id: &UserId,
    amount: i64,
) -> Result<i64, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }

    let balance: Option<i64> = sqlx::query_scalar(
        "UPDATE users SET credits = credits + ?, updated_at = ? WHERE id = ? RETURNING credits",
    )
    .bind(amount)
    .bind(format_datetime(&Utc::now()))
    .bind(user_id.to_string())
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage_err)?;

    balance.ok_or(LedgerError::UserNotFound)
}

impl CreditLedger for SqliteCreditLedger {
    async fn get_or_create_user(&self, principal: &Principal) -> Result<User, LedgerError> {
        let candidate = User::new_from_principal(principal);
        let now = format_datetime(&candidate.created_at);

        // INSERT OR IGNORE keeps the first writer's row when two requests
        // for a new principal race.
        sqlx::query(
            r#"INSERT OR IGNORE INTO users (id, external_id, email, credits, created_at, updated_at)
               VALUES (?, ?, ?, 0, ?, ?)"#,
        )
        .bind(candidate.id.to_string())
        .bind(&candidate.external_id)
        .bind(&candidate.email)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(&principal.external_id)
            .fetch_one(&self.pool.writer)
            .await
            .map_err(storage_err)?;

        UserRow::from_row(&row).map_err(storage_err)?.into_user()
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>, LedgerError> {
        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => Ok(Some(UserRow::from_row(&row).map_err(storage_err)?.into_user()?)),
            None => Ok(None),
        }
    }

    async fn balance(&self, user_id: &UserId) -> Result<i64, LedgerError> {
        let credits: Option<i64> = sqlx::query_scalar("SELECT credits FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_err)?;

        credits.ok_or(LedgerError::UserNotFound)
    }

    async fn has_credit(&self, user_id: &UserId) -> Result<CreditCheck, LedgerError> {
        Ok(CreditCheck::from_balance(self.balance(user_id).await?))
    }

    async fn decrement_if_positive(&self, user_id: &UserId) -> Result<i64, LedgerError> {
        let mut conn = self.pool.writer.acquire().await.map_err(storage_err)?;
        debit_in(&mut conn, user_id).await
    }

    async fn increment(&self, user_id: &UserId, amount: i64) -> Result<i64, LedgerError> {
        let mut conn = self.pool.writer.acquire().await.map_err(storage_err)?;
        credit_in(&mut conn, user_id, amount).await
    }

    async fn apply_payment(
        &self,
        event_id: &str,
        external_id: &str,
        amount: i64,
    ) -> Result<PaymentOutcome, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut tx = self.pool.writer.begin().await.map_err(storage_err)?;

        let user_id: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage_err)?;

        let Some(user_id) = user_id else {
            return Ok(PaymentOutcome::UnknownUser);
        };
        let user_id = UserId::from_uuid(
            Uuid::parse_str(&user_id)
                .map_err(|e| LedgerError::StorageError(format!("invalid user id: {e}")))?,
        );

        let recorded = sqlx::query(
            "INSERT INTO payment_events (event_id, user_id, credits, processed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(event_id)
        .bind(user_id.to_string())
        .bind(amount)
        .bind(format_datetime(&Utc::now()))
        .execute(&mut *tx)
        .await;

        if let Err(e) = recorded {
            if is_unique_violation(&e) {
                return Ok(PaymentOutcome::Duplicate);
            }
            return Err(storage_err(e));
        }

        let balance = credit_in(&mut tx, &user_id, amount).await?;
        tx.commit().await.map_err(storage_err)?;

        Ok(PaymentOutcome::Credited { user_id, balance })
    }
}
