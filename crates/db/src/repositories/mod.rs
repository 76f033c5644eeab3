//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` (or an open transaction) as the first argument.

pub mod asset_repo;
pub mod credit_repo;
pub mod generation_repo;

pub use asset_repo::AssetRepo;
pub use credit_repo::CreditRepo;
pub use generation_repo::GenerationRepo;

/// Maximum page size for list queries.
pub const MAX_LIMIT: i64 = 100;

/// Clamp a caller-supplied page size into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIMIT)
}
