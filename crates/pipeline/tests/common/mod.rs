//! Shared fixtures: a scripted provider and an orchestrator over the
//! in-memory store.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshforge_core::asset::{GeneratedAsset, NewAsset};
use meshforge_core::generation::{
    GenerationRequest, GenerationStatus, NewGeneration, PipelineStage,
};
use meshforge_core::types::{Credits, DbId};
use meshforge_db::{GenerationStore, GenerationWatch, MemoryStore, StatusUpdate, StoreError};
use meshforge_events::EventBus;
use meshforge_pipeline::{GenerationOrchestrator, OrchestratorConfig, StaticIdentity};
use meshforge_provider::messages::{ModelUrls, TaskError, TextJobMode, TextureUrls};
use meshforge_provider::{
    ImageJobRequest, PollConfig, ProviderError, TaskClient, TaskSnapshot, TextJobRequest,
};

pub const OWNER: DbId = 42;

/// One provider interaction, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePreview,
    CreateRefine { preview_task_id: Option<String> },
    CreateImage,
    Poll(String),
}

#[derive(Default)]
struct Inner {
    next_task: u32,
    /// Snapshot scripts handed to jobs in creation order.
    scripts: VecDeque<Vec<TaskSnapshot>>,
    running: HashMap<String, VecDeque<TaskSnapshot>>,
    create_error: Option<(u16, String)>,
    calls: Vec<Call>,
}

/// Fake provider. Each created job replays the next script; the last
/// snapshot of a script repeats forever.
#[derive(Default)]
pub struct ScriptedClient {
    inner: Mutex<Inner>,
}

impl ScriptedClient {
    pub fn new(scripts: Vec<Vec<TaskSnapshot>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                scripts: scripts.into(),
                ..Inner::default()
            }),
        }
    }

    /// Every job creation fails with `status` and `body`.
    pub fn failing_create(status: u16, body: &str) -> Self {
        Self {
            inner: Mutex::new(Inner {
                create_error: Some((status, body.to_string())),
                ..Inner::default()
            }),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    fn create(&self, call: Call, prefix: &str) -> Result<String, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        if let Some((status, body)) = inner.create_error.clone() {
            return Err(ProviderError::Api { status, body });
        }
        inner.next_task += 1;
        let task_id = format!("{prefix}-{}", inner.next_task);
        let script = inner
            .scripts
            .pop_front()
            .expect("test created more jobs than it scripted");
        inner.running.insert(task_id.clone(), script.into());
        Ok(task_id)
    }
}

#[async_trait]
impl TaskClient for ScriptedClient {
    async fn create_text_job(&self, request: &TextJobRequest) -> Result<String, ProviderError> {
        match request.mode {
            TextJobMode::Preview => self.create(Call::CreatePreview, "preview"),
            TextJobMode::Refine => self.create(
                Call::CreateRefine {
                    preview_task_id: request.preview_task_id.clone(),
                },
                "refine",
            ),
        }
    }

    async fn create_image_job(&self, _: &ImageJobRequest) -> Result<String, ProviderError> {
        self.create(Call::CreateImage, "image")
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Poll(task_id.to_string()));
        let script = inner
            .running
            .get_mut(task_id)
            .expect("polled a task that was never created");
        let snapshot = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().expect("empty script")
        };
        Ok(TaskSnapshot {
            id: task_id.to_string(),
            ..snapshot
        })
    }
}

// ---- snapshots ----

pub fn running(progress: i16) -> TaskSnapshot {
    TaskSnapshot {
        id: String::new(),
        status: "IN_PROGRESS".into(),
        progress: Some(progress),
        model_urls: None,
        texture_urls: None,
        thumbnail_url: None,
        video_url: None,
        task_error: None,
        created_at: None,
        started_at: None,
        finished_at: None,
        expires_at: None,
    }
}

pub fn succeeded() -> TaskSnapshot {
    TaskSnapshot {
        status: "SUCCEEDED".into(),
        progress: Some(100),
        model_urls: Some(ModelUrls {
            glb: Some("https://assets.example.com/model.glb".into()),
            usdz: Some("https://assets.example.com/model.usdz".into()),
            ..ModelUrls::default()
        }),
        texture_urls: Some(vec![TextureUrls {
            base_color: Some("https://assets.example.com/base.png".into()),
            ..TextureUrls::default()
        }]),
        thumbnail_url: Some("https://assets.example.com/thumb.png".into()),
        expires_at: Some(1_790_000_000_000),
        ..running(100)
    }
}

pub fn failed(message: &str) -> TaskSnapshot {
    TaskSnapshot {
        status: "FAILED".into(),
        progress: None,
        task_error: Some(TaskError {
            message: Some(message.into()),
        }),
        ..running(0)
    }
}

// ---- orchestrator ----

pub fn fast_config(max_attempts: u32) -> OrchestratorConfig {
    OrchestratorConfig {
        poll: PollConfig {
            max_attempts,
            interval: Duration::from_millis(1),
        },
    }
}

pub struct Harness {
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub store: Arc<MemoryStore>,
    pub client: Arc<ScriptedClient>,
}

pub fn harness(client: ScriptedClient, balance: Credits) -> Harness {
    harness_with(client, balance, StaticIdentity::user(OWNER), fast_config(10))
}

pub fn harness_with(
    client: ScriptedClient,
    balance: Credits,
    identity: StaticIdentity,
    config: OrchestratorConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::with_balance(OWNER, balance));
    let client = Arc::new(client);
    let orchestrator = GenerationOrchestrator::new(
        client.clone(),
        store.clone(),
        store.clone(),
        Arc::new(identity),
        Arc::new(EventBus::default()),
        config,
    );
    Harness {
        orchestrator,
        store,
        client,
    }
}

/// Polls slowly enough that a test can act while a stage is running.
pub fn slow_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll: PollConfig {
            max_attempts: 10_000,
            interval: Duration::from_millis(20),
        },
    }
}

// ---- fault injection ----

/// Where [`FlakyStore`] injects its single error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The first read that sees a `Succeeded` record fails.
    ReadAfterSuccess,
    /// Completion commits, then reports an error.
    CompletionReply,
}

/// Delegates to a [`MemoryStore`] and fails exactly once at `fault`.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    fault: Fault,
    tripped: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            tripped: AtomicBool::new(false),
        }
    }

    fn trip(&self, fault: Fault) -> bool {
        self.fault == fault && !self.tripped.swap(true, Ordering::SeqCst)
    }

    fn injected() -> StoreError {
        StoreError::Corrupt("injected store failure".into())
    }
}

#[async_trait]
impl GenerationStore for FlakyStore {
    async fn create_generation(&self, new: &NewGeneration) -> Result<GenerationRequest, StoreError> {
        self.inner.create_generation(new).await
    }

    async fn find_generation(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GenerationRequest>, StoreError> {
        let found = self.inner.find_generation(id, owner_id).await?;
        let succeeded = found
            .as_ref()
            .is_some_and(|g| g.status == GenerationStatus::Succeeded);
        if succeeded && self.trip(Fault::ReadAfterSuccess) {
            return Err(Self::injected());
        }
        Ok(found)
    }

    async fn list_generations(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        self.inner.list_generations(owner_id, limit).await
    }

    async fn transition(
        &self,
        id: DbId,
        expected: GenerationStatus,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        self.inner.transition(id, expected, update).await
    }

    async fn update_progress(&self, id: DbId, progress: i16) -> Result<bool, StoreError> {
        self.inner.update_progress(id, progress).await
    }

    async fn record_task_id(
        &self,
        id: DbId,
        stage: PipelineStage,
        task_id: &str,
    ) -> Result<bool, StoreError> {
        self.inner.record_task_id(id, stage, task_id).await
    }

    async fn complete_generation(
        &self,
        id: DbId,
        asset: &NewAsset,
    ) -> Result<Option<(GenerationRequest, GeneratedAsset)>, StoreError> {
        let completed = self.inner.complete_generation(id, asset).await?;
        if completed.is_some() && self.trip(Fault::CompletionReply) {
            return Err(Self::injected());
        }
        Ok(completed)
    }

    async fn find_asset(
        &self,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        self.inner.find_asset(id, owner_id).await
    }

    async fn find_asset_for_generation(
        &self,
        generation_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GeneratedAsset>, StoreError> {
        self.inner.find_asset_for_generation(generation_id, owner_id).await
    }

    async fn list_assets(
        &self,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GeneratedAsset>, StoreError> {
        self.inner.list_assets(owner_id, limit).await
    }

    fn subscribe(&self, generation_id: DbId) -> GenerationWatch {
        self.inner.subscribe(generation_id)
    }
}

/// Orchestrator whose record store injects `fault`; credits stay on the
/// plain in-memory store.
pub fn flaky_harness(client: ScriptedClient, balance: Credits, fault: Fault) -> Harness {
    let store = Arc::new(MemoryStore::with_balance(OWNER, balance));
    let client = Arc::new(client);
    let orchestrator = GenerationOrchestrator::new(
        client.clone(),
        Arc::new(FlakyStore::new(store.clone(), fault)),
        store.clone(),
        Arc::new(StaticIdentity::user(OWNER)),
        Arc::new(EventBus::default()),
        fast_config(10),
    );
    Harness {
        orchestrator,
        store,
        client,
    }
}
