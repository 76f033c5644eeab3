//! Row model for the `credit_accounts` table.

use meshforge_core::types::{Credits, DbId, Timestamp};
use sqlx::FromRow;

use crate::store::CreditBalance;

#[derive(Debug, Clone, FromRow)]
pub struct CreditAccountRow {
    pub owner_id: DbId,
    pub balance: Credits,
    pub reserved: Credits,
    pub updated_at: Timestamp,
}

impl From<CreditAccountRow> for CreditBalance {
    fn from(row: CreditAccountRow) -> Self {
        CreditBalance {
            balance: row.balance,
            reserved: row.reserved,
        }
    }
}
