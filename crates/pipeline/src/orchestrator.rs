//! The generation orchestrator.
//!
//! One spawned task per generation walks the lifecycle state machine:
//!
//! 1. Validate, authenticate and reserve the estimated cost. Refusal here
//!    creates nothing.
//! 2. Create the `Pending` record.
//! 3. For each stage: create the provider job, record its task id, move
//!    the record to `InProgress`, and poll the task with write-through
//!    progress.
//! 4. Store the asset and mark the record `Succeeded` in one write, then
//!    settle the reservation.
//!
//! Any error ends the record at `Failed` with the error's message and
//! releases the reservation. Cancellation is cooperative: the poll loop
//! stops at its next check and every store write is a compare-and-set,
//! so a cancel that lands first always wins.

use std::collections::HashMap;
use std::sync::Arc;

use meshforge_core::asset::{GeneratedAsset, NewAsset};
use meshforge_core::estimation::estimate_cost;
use meshforge_core::generation::{
    GenerationInput, GenerationRequest, GenerationStatus, NewGeneration, PipelineStage,
};
use meshforge_core::lifecycle::{Effect, GenerationState, LifecycleEvent};
use meshforge_core::types::{Credits, DbId};
use meshforge_db::{CreditLedger, GenerationStore, StatusUpdate};
use meshforge_events::{EventBus, GenerationEvent, GenerationEventKind};
use meshforge_provider::messages::TaskSnapshot;
use meshforge_provider::{poll_task, PollConfig, ProgressSink, StageJob, TaskClient};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{GenerationError, PreconditionError};
use crate::identity::IdentityProvider;
use crate::progress::StageProgress;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Per-stage poll cadence and attempt budget.
    pub poll: PollConfig,
}

/// Result of a successful generation.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub generation: GenerationRequest,
    pub asset: GeneratedAsset,
    /// Balance after the charge, or `None` if settling failed.
    pub balance: Option<Credits>,
}

/// A submitted generation running in the background.
#[derive(Debug)]
pub struct GenerationHandle {
    pub generation_id: DbId,
    pub owner_id: DbId,
    pub cost: Credits,
    task: JoinHandle<Result<GenerationOutcome, GenerationError>>,
}

impl GenerationHandle {
    /// Wait for the generation to reach a terminal status.
    pub async fn wait(self) -> Result<GenerationOutcome, GenerationError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(GenerationError::Internal(format!(
                "generation task ended abnormally: {e}"
            ))),
        }
    }
}

pub struct GenerationOrchestrator {
    client: Arc<dyn TaskClient>,
    store: Arc<dyn GenerationStore>,
    ledger: Arc<dyn CreditLedger>,
    identity: Arc<dyn IdentityProvider>,
    events: Arc<EventBus>,
    config: OrchestratorConfig,
    /// Cancellation tokens of running generations, by generation id.
    active: RwLock<HashMap<DbId, CancellationToken>>,
}

impl GenerationOrchestrator {
    pub fn new(
        client: Arc<dyn TaskClient>,
        store: Arc<dyn GenerationStore>,
        ledger: Arc<dyn CreditLedger>,
        identity: Arc<dyn IdentityProvider>,
        events: Arc<EventBus>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            store,
            ledger,
            identity,
            events,
            config,
            active: RwLock::new(HashMap::new()),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Submit a generation and return once its `Pending` record exists.
    ///
    /// Precondition failures return [`GenerationError::Precondition`] and
    /// leave no record and no reservation behind.
    pub async fn start(
        self: &Arc<Self>,
        input: GenerationInput,
    ) -> Result<GenerationHandle, GenerationError> {
        input
            .check()
            .map_err(|e| PreconditionError::InvalidInput(e.to_string()))?;
        let owner_id = self
            .identity
            .current_user()
            .await
            .ok_or(PreconditionError::NotAuthenticated)?;

        let cost = estimate_cost(&input).total();
        if !self.ledger.reserve_credits(owner_id, cost).await? {
            let available = self.ledger.balance(owner_id).await?.available();
            tracing::info!(owner_id, cost, available, "Generation refused: insufficient credits");
            return Err(PreconditionError::InsufficientCredits {
                required: cost,
                available,
            }
            .into());
        }

        let record = match self
            .store
            .create_generation(&NewGeneration { owner_id, input })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.release(owner_id, cost).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            generation_id = record.id,
            owner_id,
            kind = record.kind.as_str(),
            cost,
            "Generation submitted",
        );

        let cancel = CancellationToken::new();
        self.active.write().await.insert(record.id, cancel.clone());

        let generation_id = record.id;
        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(record, cost, cancel).await });

        Ok(GenerationHandle {
            generation_id,
            owner_id,
            cost,
            task,
        })
    }

    /// Submit a generation and wait for its terminal status.
    pub async fn generate(
        self: &Arc<Self>,
        input: GenerationInput,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.start(input).await?.wait().await
    }

    /// Cancel a generation owned by the current user, whether or not this
    /// orchestrator is running it.
    ///
    /// Returns `false` if the generation already reached a terminal status.
    pub async fn cancel(&self, generation_id: DbId) -> Result<bool, GenerationError> {
        let owner_id = self
            .identity
            .current_user()
            .await
            .ok_or(PreconditionError::NotAuthenticated)?;
        self.store
            .find_generation(generation_id, owner_id)
            .await?
            .ok_or(GenerationError::NotFound(generation_id))?;

        let token = self.active.read().await.get(&generation_id).cloned();
        if let Some(token) = &token {
            token.cancel();
        }

        // Records this instance is not running (e.g. left behind by a
        // restart) are canceled in the store directly.
        let canceled = match self
            .finish(generation_id, owner_id, StatusUpdate::canceled())
            .await?
        {
            None => true,
            // The pipeline task observed the token and wrote it first.
            Some(GenerationStatus::Canceled) => token.is_some(),
            Some(_) => false,
        };
        if canceled {
            tracing::info!(
                generation_id,
                owner_id,
                running = token.is_some(),
                "Generation canceled",
            );
        }
        Ok(canceled)
    }

    /// Whether a generation is still running in this orchestrator.
    pub async fn is_running(&self, generation_id: DbId) -> bool {
        self.active.read().await.contains_key(&generation_id)
    }

    // ---- pipeline task ----

    async fn run(
        self: Arc<Self>,
        record: GenerationRequest,
        cost: Credits,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        let generation_id = record.id;
        let owner_id = record.owner_id;

        let result = self.drive(&record, &cancel).await;
        self.active.write().await.remove(&generation_id);

        let err = match result {
            Ok((generation, asset)) => return Ok(self.settle(generation, asset, cost).await),
            Err(err) => err,
        };

        let update = if err.is_canceled() {
            StatusUpdate::canceled()
        } else {
            StatusUpdate::failed(&err.to_string())
        };
        let already = match self.finish(generation_id, owner_id, update).await {
            Ok(already) => already,
            Err(store_err) => {
                self.release(owner_id, cost).await;
                tracing::error!(
                    generation_id,
                    error = %err,
                    store_error = %store_err,
                    "Failed to record generation outcome",
                );
                return Err(store_err);
            }
        };

        match already {
            None if err.is_canceled() => {
                self.release(owner_id, cost).await;
                self.publish(&record, GenerationEventKind::Canceled);
                Err(err)
            }
            None => {
                self.release(owner_id, cost).await;
                let message = err.to_string();
                tracing::error!(generation_id, owner_id, error = %message, "Generation failed");
                self.publish(&record, GenerationEventKind::Failed { error: message });
                Err(err)
            }
            Some(GenerationStatus::Succeeded) => {
                // Completion committed even though the call reported an
                // error; the asset exists, so the cost is charged.
                tracing::error!(
                    generation_id,
                    error = %err,
                    "Generation succeeded but completion reported an error",
                );
                if let Err(e) = self.ledger.settle_reservation(owner_id, cost).await {
                    tracing::error!(generation_id, owner_id, cost, error = %e, "Failed to settle credits");
                }
                Err(err)
            }
            Some(status) => {
                self.release(owner_id, cost).await;
                tracing::info!(
                    generation_id,
                    status = status.as_str(),
                    error = %err,
                    "Outcome discarded; generation already terminal",
                );
                if status == GenerationStatus::Canceled {
                    self.publish(&record, GenerationEventKind::Canceled);
                    Err(GenerationError::Canceled)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Run every stage of `record` and store the asset.
    async fn drive(
        &self,
        record: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<(GenerationRequest, GeneratedAsset), GenerationError> {
        let kind = record.kind;
        let mut state = GenerationState::Pending;
        let mut stage = kind.first_stage();
        let mut previous_task: Option<String> = None;

        loop {
            ensure_active(cancel)?;
            let job = StageJob::for_stage(stage, &record.input, previous_task.as_deref());
            let task_id = self.client.create_job(&job).await?;

            let transition = state.apply(kind, LifecycleEvent::JobCreated(stage))?;
            if !self.store.record_task_id(record.id, stage, &task_id).await? {
                return Err(GenerationError::Canceled);
            }
            if state == GenerationState::Pending
                && !self
                    .store
                    .transition(record.id, GenerationStatus::Pending, &StatusUpdate::in_progress())
                    .await?
            {
                return Err(GenerationError::Canceled);
            }
            state = transition.next;

            tracing::info!(
                generation_id = record.id,
                stage = stage.as_str(),
                task_id = %task_id,
                "Stage started",
            );
            self.publish(
                record,
                GenerationEventKind::StageStarted {
                    stage,
                    task_id: task_id.clone(),
                },
            );

            ensure_active(cancel)?;
            let snapshot = self.poll_stage(record, stage, &task_id, cancel).await?;

            let transition = state.apply(kind, LifecycleEvent::StageSucceeded(stage))?;
            state = transition.next;
            match transition.effect {
                Effect::SubmitStage(next) => {
                    tracing::info!(
                        generation_id = record.id,
                        stage = stage.as_str(),
                        next = next.as_str(),
                        "Stage succeeded",
                    );
                    previous_task = Some(task_id);
                    stage = next;
                }
                Effect::Finalize => {
                    ensure_active(cancel)?;
                    return self.finalize(record, &snapshot).await;
                }
                other => {
                    return Err(GenerationError::Internal(format!(
                        "unexpected effect {other:?} after stage success"
                    )))
                }
            }
        }
    }

    async fn poll_stage(
        &self,
        record: &GenerationRequest,
        stage: PipelineStage,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TaskSnapshot, GenerationError> {
        let sink = StageProgress {
            store: self.store.as_ref(),
            events: &self.events,
            generation_id: record.id,
            owner_id: record.owner_id,
            band: stage.progress_band(),
        };
        sink.report(0).await;
        Ok(poll_task(self.client.as_ref(), task_id, &self.config.poll, cancel, &sink).await?)
    }

    /// Store the asset and mark the record succeeded.
    async fn finalize(
        &self,
        record: &GenerationRequest,
        snapshot: &TaskSnapshot,
    ) -> Result<(GenerationRequest, GeneratedAsset), GenerationError> {
        let asset = NewAsset {
            generation_id: record.id,
            owner_id: record.owner_id,
            outputs: snapshot.asset_outputs(),
            expires_at: snapshot.expires_at(),
        };
        self.store
            .complete_generation(record.id, &asset)
            .await?
            .ok_or(GenerationError::Canceled)
    }

    /// Charge the reservation once success is durable. Nothing here can
    /// turn the generation back into a failure.
    async fn settle(
        &self,
        generation: GenerationRequest,
        asset: GeneratedAsset,
        cost: Credits,
    ) -> GenerationOutcome {
        let balance = match self
            .ledger
            .settle_reservation(generation.owner_id, cost)
            .await
        {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::error!(
                    generation_id = generation.id,
                    owner_id = generation.owner_id,
                    cost,
                    error = %e,
                    "Failed to settle credits for a succeeded generation",
                );
                None
            }
        };

        self.publish(&generation, GenerationEventKind::Progress { progress: 100 });
        self.publish(&generation, GenerationEventKind::Completed { asset_id: asset.id });
        tracing::info!(
            generation_id = generation.id,
            asset_id = asset.id,
            cost,
            balance = ?balance,
            "Generation succeeded",
        );
        GenerationOutcome {
            generation,
            asset,
            balance,
        }
    }

    /// Move a record to a terminal status from whatever non-terminal status
    /// it holds. Returns the status it already had if it was terminal.
    async fn finish(
        &self,
        generation_id: DbId,
        owner_id: DbId,
        update: StatusUpdate,
    ) -> Result<Option<GenerationStatus>, GenerationError> {
        loop {
            let current = self
                .store
                .find_generation(generation_id, owner_id)
                .await?
                .ok_or(GenerationError::NotFound(generation_id))?;
            if current.is_terminal() {
                return Ok(Some(current.status));
            }
            if self
                .store
                .transition(generation_id, current.status, &update)
                .await?
            {
                return Ok(None);
            }
        }
    }

    async fn release(&self, owner_id: DbId, cost: Credits) {
        if let Err(e) = self.ledger.release_reservation(owner_id, cost).await {
            tracing::warn!(owner_id, cost, error = %e, "Failed to release credit reservation");
        }
    }

    fn publish(&self, record: &GenerationRequest, kind: GenerationEventKind) {
        self.events
            .publish(GenerationEvent::new(record.id, record.owner_id, kind));
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), GenerationError> {
    if cancel.is_cancelled() {
        Err(GenerationError::Canceled)
    } else {
        Ok(())
    }
}
