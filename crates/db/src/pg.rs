//! PostgreSQL-backed [`GenerationStore`] and [`CreditLedger`].
//!
//! Record changes are published to watchers after the statement (or
//! transaction) that made them has committed.

use async_trait::async_trait;
use meshforge_core::asset::{GeneratedAsset, NewAsset};
use meshforge_core::generation::{
    GenerationRequest, GenerationStatus, NewGeneration, PipelineStage,
};
use meshforge_core::types::{Credits, DbId};
use tokio::sync::broadcast;

use crate::models::generation::GenerationRow;
use crate::repositories::{AssetRepo, CreditRepo, GenerationRepo};
use crate::store::{
    CreditBalance, CreditLedger, GenerationStore, GenerationWatch, StatusUpdate, StoreError,
    WATCH_CAPACITY,
};
use crate::DbPool;

pub struct PgStore {
    pool: DbPool,
    changes: broadcast::Sender<GenerationRequest>,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        let (changes, _) = broadcast::channel(WATCH_CAPACITY);
        Self { pool, changes }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Convert a committed row and notify watchers.
    fn publish(&self, row: GenerationRow) -> Result<GenerationRequest, StoreError> {
        let record = GenerationRequest::try_from(row)?;
        let _ = self.changes.send(record.clone());
        Ok(record)
    }

    fn not_found(id: DbId) -> StoreError {
        StoreError::NotFound {
            entity: "generation",
            id,
        }
    }
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn create_generation(
        &self,
        new: &NewGeneration,
    ) -> Result<GenerationRequest, StoreError> {
        let input = serde_json::to_value(&new.input)?;
        let row =
            GenerationRepo::create(&self.pool, new.owner_id, new.input.kind.as_str(), &input)
                .await?;
        tracing::debug!(generation_id = row.id, owner_id = new.owner_id, "Generation row created");
        self.publish(row)
    }

    async fn find_generation(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GenerationRequest>, StoreError> {
        GenerationRepo::find_for_owner(&self.pool, id, owner_id)
            .await?
            .map(GenerationRequest::try_from)
            .transpose()
    }

    async fn list_generations(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        GenerationRepo::list_for_owner(&self.pool, owner_id, limit)
            .await?
            .into_iter()
            .map(GenerationRequest::try_from)
            .collect()
    }

    async fn transition(
        &self,
        id: DbId,
        expected: GenerationStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        update.check(expected)?;
        let row = GenerationRepo::transition(
            &self.pool,
            id,
            expected,
            update.status,
            update.error_message.as_deref(),
        )
        .await?;
        match row {
            Some(row) => {
                self.publish(row)?;
                Ok(true)
            }
            None => {
                GenerationRepo::find_by_id(&self.pool, id)
                    .await?
                    .ok_or_else(|| Self::not_found(id))?;
                Ok(false)
            }
        }
    }

    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError> {
        match GenerationRepo::update_progress(&self.pool, id, progress).await? {
            Some(row) => {
                self.publish(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_task_id(
        &self,
        id: DbId,
        stage: PipelineStage,
        task_id: &str,
    ) -> Result<bool, StoreError> {
        if let Some(row) = GenerationRepo::record_task_id(&self.pool, id, stage, task_id).await? {
            self.publish(row)?;
            return Ok(true);
        }

        let current = GenerationRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| Self::not_found(id))?;
        let current = GenerationRequest::try_from(current)?;
        if current.is_terminal() {
            return Ok(false);
        }
        Err(StoreError::InvalidUpdate(format!(
            "{} task id already recorded as {}",
            stage.as_str(),
            current.task_id_for(stage).unwrap_or_default()
        )))
    }

    async fn complete_generation(
        &self,
        id: DbId,
        asset: &NewAsset,
    ) -> Result<Option<(GenerationRequest, GeneratedAsset)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let status = GenerationRepo::lock_status(&mut tx, id)
            .await?
            .ok_or_else(|| Self::not_found(id))?;
        if status != GenerationStatus::InProgress.id() {
            tx.rollback().await?;
            return Ok(None);
        }

        let asset_row = AssetRepo::insert(&mut tx, asset).await?;
        let generation_row = GenerationRepo::mark_succeeded(
            &mut tx,
            id,
            asset_row.id,
            asset.outputs.thumbnail_url.as_deref(),
            asset.outputs.video_url.as_deref(),
        )
        .await?;
        // Decode before commit so nothing can fail once success is durable.
        let record = GenerationRequest::try_from(generation_row)?;
        tx.commit().await?;

        let _ = self.changes.send(record.clone());
        Ok(Some((record, asset_row.into())))
    }

    async fn find_asset(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        Ok(AssetRepo::find_for_owner(&self.pool, id, owner_id)
            .await?
            .map(Into::into))
    }

    async fn find_asset_for_generation(
        &self,
        generation_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        Ok(AssetRepo::find_by_generation(&self.pool, generation_id, owner_id)
            .await?
            .map(Into::into))
    }

    async fn list_assets(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        Ok(AssetRepo::list_for_owner(&self.pool, owner_id, limit)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    fn subscribe(&self, generation_id: DbId) -> GenerationWatch {
        GenerationWatch::new(generation_id, self.changes.subscribe())
    }
}

#[async_trait]
impl CreditLedger for PgStore {
    async fn balance(&self, owner_id: DbId) -> Result<CreditBalance, StoreError> {
        Ok(CreditRepo::find(&self.pool, owner_id)
            .await?
            .map(CreditBalance::from)
            .unwrap_or_default())
    }

    async fn adjust_balance(&self, owner_id: DbId, delta: Credits) -> Result<Credits, StoreError> {
        CreditRepo::ensure_account(&self.pool, owner_id).await?;
        let row = CreditRepo::adjust(&self.pool, owner_id, delta)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidUpdate(format!(
                    "adjusting owner {owner_id} by {delta} would undercut reserved credits"
                ))
            })?;
        tracing::info!(owner_id, delta, balance = row.balance, "Credit balance adjusted");
        Ok(row.balance)
    }

    async fn reserve_credits(&self, owner_id: DbId, amount: Credits) -> Result<bool, StoreError> {
        if amount < 0 {
            return Err(StoreError::InvalidUpdate(format!(
                "cannot reserve negative amount {amount}"
            )));
        }
        Ok(CreditRepo::reserve(&self.pool, owner_id, amount)
            .await?
            .is_some())
    }

    async fn settle_reservation(
        &self,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<Credits, StoreError> {
        let row = CreditRepo::settle(&self.pool, owner_id, amount)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidUpdate(format!(
                    "no reservation of {amount} for owner {owner_id}"
                ))
            })?;
        Ok(row.balance)
    }

    async fn release_reservation(
        &self,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<(), StoreError> {
        CreditRepo::release(&self.pool, owner_id, amount)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidUpdate(format!(
                    "no reservation of {amount} for owner {owner_id}"
                ))
            })?;
        Ok(())
    }
}
