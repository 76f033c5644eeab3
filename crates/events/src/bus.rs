//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`GenerationEvent`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use meshforge_core::generation::PipelineStage;
use meshforge_core::generation_events::{
    MSG_TYPE_GENERATION_CANCELED, MSG_TYPE_GENERATION_COMPLETED, MSG_TYPE_GENERATION_FAILED,
    MSG_TYPE_GENERATION_PROGRESS, MSG_TYPE_GENERATION_STAGE_STARTED,
};
use meshforge_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// GenerationEvent
// ---------------------------------------------------------------------------

/// What happened to a generation.
///
/// Serialized with a `type` tag whose values are the `MSG_TYPE_*`
/// constants from `meshforge_core::generation_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GenerationEventKind {
    #[serde(rename = "generation_progress")]
    Progress { progress: i16 },

    #[serde(rename = "generation_stage_started")]
    StageStarted {
        stage: PipelineStage,
        task_id: String,
    },

    #[serde(rename = "generation_completed")]
    Completed { asset_id: DbId },

    #[serde(rename = "generation_failed")]
    Failed { error: String },

    #[serde(rename = "generation_canceled")]
    Canceled,
}

impl GenerationEventKind {
    /// Wire name of this event kind.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Progress { .. } => MSG_TYPE_GENERATION_PROGRESS,
            Self::StageStarted { .. } => MSG_TYPE_GENERATION_STAGE_STARTED,
            Self::Completed { .. } => MSG_TYPE_GENERATION_COMPLETED,
            Self::Failed { .. } => MSG_TYPE_GENERATION_FAILED,
            Self::Canceled => MSG_TYPE_GENERATION_CANCELED,
        }
    }
}

/// An event about one generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationEvent {
    pub generation_id: DbId,

    /// Owner of the generation, so observers can filter by user.
    pub owner_id: DbId,

    #[serde(flatten)]
    pub kind: GenerationEventKind,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl GenerationEvent {
    pub fn new(generation_id: DbId, owner_id: DbId, kind: GenerationEventKind) -> Self {
        Self {
            generation_id,
            owner_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(generation_id: DbId, owner_id: DbId, progress: i16) -> Self {
        Self::new(
            generation_id,
            owner_id,
            GenerationEventKind::Progress { progress },
        )
    }

    /// Progress carried by this event, if it is a progress tick.
    pub fn progress_value(&self) -> Option<i16> {
        match self.kind {
            GenerationEventKind::Progress { progress } => Some(progress),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`GenerationEvent`].
///
/// # Usage
///
/// ```rust
/// use meshforge_events::bus::{EventBus, GenerationEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(GenerationEvent::progress(1, 42, 17));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<GenerationEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: GenerationEvent) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single generation.
    pub fn subscribe_to(&self, generation_id: DbId) -> GenerationEvents {
        GenerationEvents {
            generation_id,
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver filtered to one generation.
pub struct GenerationEvents {
    generation_id: DbId,
    receiver: broadcast::Receiver<GenerationEvent>,
}

impl GenerationEvents {
    /// Next event for this generation, or `None` once the bus is dropped.
    ///
    /// Lagged ticks are skipped.
    pub async fn next(&mut self) -> Option<GenerationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.generation_id == self.generation_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        generation_id = self.generation_id,
                        skipped,
                        "Generation event subscriber lagged",
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
