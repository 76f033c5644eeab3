//! Repository for the `credit_accounts` table.
//!
//! Every balance change is a single guarded `UPDATE`, so concurrent
//! reservations against one account serialize on the row lock and cannot
//! both pass the availability check.

use meshforge_core::types::{Credits, DbId};
use sqlx::PgPool;

use crate::models::credit::CreditAccountRow;

/// Column list for `credit_accounts` queries.
const COLUMNS: &str = "owner_id, balance, reserved, updated_at";

pub struct CreditRepo;

impl CreditRepo {
    pub async fn find(
        pool: &PgPool,
        owner_id: DbId,
    ) -> Result<Option<CreditAccountRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM credit_accounts WHERE owner_id = $1");
        sqlx::query_as::<_, CreditAccountRow>(&query)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    /// Create an empty account for `owner_id` if none exists.
    pub async fn ensure_account(pool: &PgPool, owner_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO credit_accounts (owner_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(owner_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Add `delta` to the balance unless it would drop below `reserved`.
    pub async fn adjust(
        pool: &PgPool,
        owner_id: DbId,
        delta: Credits,
    ) -> Result<Option<CreditAccountRow>, sqlx::Error> {
        let query = format!(
            "UPDATE credit_accounts \
             SET balance = balance + $2, updated_at = NOW() \
             WHERE owner_id = $1 AND balance + $2 >= reserved \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CreditAccountRow>(&query)
            .bind(owner_id)
            .bind(delta)
            .fetch_optional(pool)
            .await
    }

    /// Reserve `amount` if that much is available.
    pub async fn reserve(
        pool: &PgPool,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<Option<CreditAccountRow>, sqlx::Error> {
        let query = format!(
            "UPDATE credit_accounts \
             SET reserved = reserved + $2, updated_at = NOW() \
             WHERE owner_id = $1 AND balance - reserved >= $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CreditAccountRow>(&query)
            .bind(owner_id)
            .bind(amount)
            .fetch_optional(pool)
            .await
    }

    /// Deduct a reservation from both `reserved` and `balance`.
    pub async fn settle(
        pool: &PgPool,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<Option<CreditAccountRow>, sqlx::Error> {
        let query = format!(
            "UPDATE credit_accounts \
             SET reserved = reserved - $2, balance = balance - $2, updated_at = NOW() \
             WHERE owner_id = $1 AND reserved >= $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CreditAccountRow>(&query)
            .bind(owner_id)
            .bind(amount)
            .fetch_optional(pool)
            .await
    }

    /// Drop a reservation without charging it.
    pub async fn release(
        pool: &PgPool,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<Option<CreditAccountRow>, sqlx::Error> {
        let query = format!(
            "UPDATE credit_accounts \
             SET reserved = reserved - $2, updated_at = NOW() \
             WHERE owner_id = $1 AND reserved >= $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, CreditAccountRow>(&query)
            .bind(owner_id)
            .bind(amount)
            .fetch_optional(pool)
            .await
    }
}
