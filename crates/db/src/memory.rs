//! In-process store used by tests and by the worker when no database is
//! configured.
//!
//! All state sits behind one async mutex. Change notifications are sent
//! while the lock is held, so watchers observe writes in commit order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use meshforge_core::asset::{GeneratedAsset, NewAsset};
use meshforge_core::generation::{
    GenerationRequest, GenerationStatus, NewGeneration, PipelineStage,
};
use meshforge_core::types::{Credits, DbId};
use tokio::sync::{broadcast, Mutex};

use crate::repositories::clamp_limit;
use crate::store::{
    CreditBalance, CreditLedger, GenerationStore, GenerationWatch, StatusUpdate, StoreError,
    WATCH_CAPACITY,
};

#[derive(Default)]
struct State {
    next_generation_id: DbId,
    next_asset_id: DbId,
    generations: HashMap<DbId, GenerationRequest>,
    assets: HashMap<DbId, GeneratedAsset>,
    accounts: HashMap<DbId, CreditBalance>,
}

pub struct MemoryStore {
    state: Mutex<State>,
    changes: broadcast::Sender<GenerationRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::from_state(State::default())
    }

    /// Store whose only account belongs to `owner_id` with `balance` credits.
    pub fn with_balance(owner_id: DbId, balance: Credits) -> Self {
        let mut state = State::default();
        state.accounts.insert(
            owner_id,
            CreditBalance {
                balance,
                reserved: 0,
            },
        );
        Self::from_state(state)
    }

    fn from_state(state: State) -> Self {
        let (changes, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            state: Mutex::new(state),
            changes,
        }
    }

    fn publish(&self, record: &GenerationRequest) {
        let _ = self.changes.send(record.clone());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn owned<'a>(
    generations: &'a HashMap<DbId, GenerationRequest>,
    id: DbId,
    owner_id: DbId,
) -> Option<&'a GenerationRequest> {
    generations.get(&id).filter(|g| g.owner_id == owner_id)
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn create_generation(
        &self,
        new: &NewGeneration,
    ) -> Result<GenerationRequest, StoreError> {
        let mut state = self.state.lock().await;
        state.next_generation_id += 1;
        let now = Utc::now();
        let record = GenerationRequest {
            id: state.next_generation_id,
            owner_id: new.owner_id,
            kind: new.input.kind,
            input: new.input.clone(),
            status: GenerationStatus::Pending,
            progress: 0,
            task_id: None,
            preview_task_id: None,
            refine_task_id: None,
            asset_id: None,
            thumbnail_url: None,
            video_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        state.generations.insert(record.id, record.clone());
        self.publish(&record);
        Ok(record)
    }

    async fn find_generation(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GenerationRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(owned(&state.generations, id, owner_id).cloned())
    }

    async fn list_generations(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .generations
            .values()
            .filter(|g| g.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(clamp_limit(limit) as usize);
        Ok(records)
    }

    async fn transition(
        &self,
        id: DbId,
        expected: GenerationStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        update.check(expected)?;
        let mut state = self.state.lock().await;
        let record = state
            .generations
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "generation",
                id,
            })?;
        if record.status != expected {
            return Ok(false);
        }
        let now = Utc::now();
        record.status = update.status;
        if update.error_message.is_some() {
            record.error_message = update.error_message.clone();
        }
        record.updated_at = now;
        if update.status.is_terminal() {
            record.completed_at = Some(now);
        }
        let record = record.clone();
        self.publish(&record);
        Ok(true)
    }

    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .generations
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "generation",
                id,
            })?;
        if record.status != GenerationStatus::InProgress {
            return Ok(false);
        }
        let progress = progress.clamp(0, 100);
        if progress > record.progress {
            record.progress = progress;
            record.updated_at = Utc::now();
            let record = record.clone();
            self.publish(&record);
        }
        Ok(true)
    }

    async fn record_task_id(
        &self,
        id: DbId,
        stage: PipelineStage,
        task_id: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let record = state
            .generations
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "generation",
                id,
            })?;
        if record.is_terminal() {
            return Ok(false);
        }
        let slot = match stage {
            PipelineStage::Single => &mut record.task_id,
            PipelineStage::Preview => &mut record.preview_task_id,
            PipelineStage::Refine => &mut record.refine_task_id,
        };
        match slot.as_deref() {
            Some(existing) if existing != task_id => {
                return Err(StoreError::InvalidUpdate(format!(
                    "{} task id already recorded as {existing}",
                    stage.as_str()
                )));
            }
            Some(_) => return Ok(true),
            None => {}
        }
        *slot = Some(task_id.to_string());
        record.updated_at = Utc::now();
        let record = record.clone();
        self.publish(&record);
        Ok(true)
    }

    async fn complete_generation(
        &self,
        id: DbId,
        asset: &NewAsset,
    ) -> Result<Option<(GenerationRequest, GeneratedAsset)>, StoreError> {
        let mut state = self.state.lock().await;
        let status = state
            .generations
            .get(&id)
            .map(|g| g.status)
            .ok_or(StoreError::NotFound {
                entity: "generation",
                id,
            })?;
        if status != GenerationStatus::InProgress {
            return Ok(None);
        }

        state.next_asset_id += 1;
        let now = Utc::now();
        let created = GeneratedAsset {
            id: state.next_asset_id,
            generation_id: id,
            owner_id: asset.owner_id,
            outputs: asset.outputs.clone(),
            has_pbr: asset.outputs.has_pbr(),
            created_at: now,
            expires_at: asset.expires_at,
            is_favorite: false,
            local_file_path: None,
        };
        state.assets.insert(created.id, created.clone());

        let Some(record) = state.generations.get_mut(&id) else {
            return Err(StoreError::NotFound {
                entity: "generation",
                id,
            });
        };
        record.status = GenerationStatus::Succeeded;
        record.progress = 100;
        record.asset_id = Some(created.id);
        record.thumbnail_url = asset.outputs.thumbnail_url.clone();
        record.video_url = asset.outputs.video_url.clone();
        record.updated_at = now;
        record.completed_at = Some(now);
        let record = record.clone();
        self.publish(&record);
        Ok(Some((record, created)))
    }

    async fn find_asset(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .assets
            .get(&id)
            .filter(|a| a.owner_id == owner_id)
            .cloned())
    }

    async fn find_asset_for_generation(
        &self,
        generation_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .assets
            .values()
            .find(|a| a.generation_id == generation_id && a.owner_id == owner_id)
            .cloned())
    }

    async fn list_assets(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        let state = self.state.lock().await;
        let mut assets: Vec<_> = state
            .assets
            .values()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect();
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        assets.truncate(clamp_limit(limit) as usize);
        Ok(assets)
    }

    fn subscribe(&self, generation_id: DbId) -> GenerationWatch {
        GenerationWatch::new(generation_id, self.changes.subscribe())
    }
}

#[async_trait]
impl CreditLedger for MemoryStore {
    async fn balance(&self, owner_id: DbId) -> Result<CreditBalance, StoreError> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&owner_id).copied().unwrap_or_default())
    }

    async fn adjust_balance(&self, owner_id: DbId, delta: Credits) -> Result<Credits, StoreError> {
        let mut state = self.state.lock().await;
        let account = state.accounts.entry(owner_id).or_default();
        let next = account.balance + delta;
        if next < account.reserved {
            return Err(StoreError::InvalidUpdate(format!(
                "balance {next} would fall below reserved {}",
                account.reserved
            )));
        }
        account.balance = next;
        Ok(next)
    }

    async fn reserve_credits(&self, owner_id: DbId, amount: Credits) -> Result<bool, StoreError> {
        if amount < 0 {
            return Err(StoreError::InvalidUpdate(format!(
                "cannot reserve negative amount {amount}"
            )));
        }
        let mut state = self.state.lock().await;
        let Some(account) = state.accounts.get_mut(&owner_id) else {
            return Ok(amount == 0);
        };
        if account.available() < amount {
            return Ok(false);
        }
        account.reserved += amount;
        Ok(true)
    }

    async fn settle_reservation(
        &self,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<Credits, StoreError> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(&owner_id)
            .filter(|a| a.reserved >= amount)
            .ok_or_else(|| {
                StoreError::InvalidUpdate(format!(
                    "no reservation of {amount} for owner {owner_id}"
                ))
            })?;
        account.reserved -= amount;
        account.balance -= amount;
        Ok(account.balance)
    }

    async fn release_reservation(
        &self,
        owner_id: DbId,
        amount: Credits,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get_mut(&owner_id)
            .filter(|a| a.reserved >= amount)
            .ok_or_else(|| {
                StoreError::InvalidUpdate(format!(
                    "no reservation of {amount} for owner {owner_id}"
                ))
            })?;
        account.reserved -= amount;
        Ok(())
    }
}
