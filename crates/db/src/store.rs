//! The generation store and credit ledger contracts.
//!
//! [`GenerationStore`] is the single source of truth for generation records
//! and their assets. Every status change is a compare-and-set on the
//! expected current status, so a writer that lost a race (for example to a
//! cancel request) learns it from the `false` return instead of
//! overwriting the winner.
//!
//! [`CreditLedger`] holds per-owner balances. Credits for a running
//! generation are reserved up front and either settled (deducted) after
//! success is recorded or released on failure.

use async_trait::async_trait;
use meshforge_core::asset::{GeneratedAsset, NewAsset};
use meshforge_core::error::CoreError;
use meshforge_core::generation::{
    GenerationRequest, GenerationStatus, NewGeneration, PipelineStage,
};
use meshforge_core::types::{Credits, DbId};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Buffer of the record-change channel shared by all watchers.
pub const WATCH_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("Stored input could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Target of a compare-and-set status transition.
///
/// `Succeeded` is not representable here; success is recorded together
/// with its asset by [`GenerationStore::complete_generation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: GenerationStatus,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn in_progress() -> Self {
        Self {
            status: GenerationStatus::InProgress,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: GenerationStatus::Failed,
            error_message: Some(message.into()),
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: GenerationStatus::Canceled,
            error_message: None,
        }
    }

    /// Reject updates no writer may request through `transition`.
    pub fn check(&self, expected: GenerationStatus) -> Result<(), StoreError> {
        match self.status {
            GenerationStatus::Pending | GenerationStatus::Succeeded => {
                Err(StoreError::InvalidUpdate(format!(
                    "status {} cannot be set by transition",
                    self.status.as_str()
                )))
            }
            _ if expected.is_terminal() => Err(StoreError::InvalidUpdate(format!(
                "cannot transition from terminal status {}",
                expected.as_str()
            ))),
            _ if self.error_message.is_some() && self.status != GenerationStatus::Failed => {
                Err(StoreError::InvalidUpdate(
                    "error_message is only recorded on failure".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Balance and outstanding reservations for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CreditBalance {
    pub balance: Credits,
    pub reserved: Credits,
}

impl CreditBalance {
    /// Credits not yet promised to a running generation.
    pub fn available(&self) -> Credits {
        self.balance - self.reserved
    }
}

/// Durable record of generation requests and their assets.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Insert a new `Pending` record and return it with its assigned id.
    async fn create_generation(&self, new: &NewGeneration)
        -> Result<GenerationRequest, StoreError>;

    /// Owner-scoped lookup; another owner's record reads as absent.
    async fn find_generation(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GenerationRequest>, StoreError>;

    /// Owner's generations, newest first.
    async fn list_generations(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GenerationRequest>, StoreError>;

    /// Move the record from `expected` to `update.status`.
    ///
    /// Returns `false` without writing when the current status is not
    /// `expected`. `completed_at` is set when the new status is terminal.
    async fn transition(
        &self,
        id: DbId,
        expected: GenerationStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError>;

    /// Raise progress to `progress` if the record is `InProgress`.
    ///
    /// Never lowers the stored value. Returns `false` when the record is
    /// not in progress.
    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError>;

    /// Persist the provider task id of `stage` on a non-terminal record.
    ///
    /// A stage's task id is written once and never cleared. Returns
    /// `false` when the record is already terminal.
    async fn record_task_id(
        &self,
        id: DbId,
        stage: PipelineStage,
        task_id: &str,
    ) -> Result<bool, StoreError>;

    /// Insert the asset and mark the record `Succeeded` with progress 100,
    /// as one write. Returns the updated record and the new asset.
    ///
    /// Returns `None` without writing when the record is not `InProgress`.
    async fn complete_generation(
        &self,
        id: DbId,
        asset: &NewAsset,
    ) -> Result<Option<(GenerationRequest, GeneratedAsset)>, StoreError>;

    async fn find_asset(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError>;

    async fn find_asset_for_generation(
        &self,
        generation_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError>;

    async fn list_assets(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GeneratedAsset>, StoreError>;

    /// Watch committed writes to one record, in write order.
    fn subscribe(&self, generation_id: DbId) -> GenerationWatch;
}

/// Atomic per-owner credit operations.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance; owners without an account read as zero.
    async fn balance(&self, owner_id: DbId) -> Result<CreditBalance, StoreError>;

    /// Add `delta` (possibly negative) to the balance and return the new
    /// balance. Fails if the balance would drop below what is reserved.
    async fn adjust_balance(&self, owner_id: DbId, delta: Credits) -> Result<Credits, StoreError>;

    /// Reserve `amount` iff at least that much is available.
    async fn reserve_credits(&self, owner_id: DbId, amount: Credits) -> Result<bool, StoreError>;

    /// Deduct a previous reservation from the balance; returns the new balance.
    async fn settle_reservation(
        &self,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<Credits, StoreError>;

    /// Return a previous reservation to the available pool.
    async fn release_reservation(&self, owner_id: DbId, amount: Credits)
        -> Result<(), StoreError>;
}

/// Receiver of committed changes to one generation record.
pub struct GenerationWatch {
    generation_id: DbId,
    receiver: broadcast::Receiver<GenerationRequest>,
}

impl GenerationWatch {
    pub fn new(generation_id: DbId, receiver: broadcast::Receiver<GenerationRequest>) -> Self {
        Self {
            generation_id,
            receiver,
        }
    }

    pub fn generation_id(&self) -> DbId {
        self.generation_id
    }

    /// Next committed state of the record, or `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<GenerationRequest> {
        loop {
            match self.receiver.recv().await {
                Ok(record) if record.id == self.generation_id => return Some(record),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        generation_id = self.generation_id,
                        skipped,
                        "Generation watcher lagged",
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
