//! Write-through progress for one running stage.

use async_trait::async_trait;
use meshforge_core::progress::scale_to_band;
use meshforge_core::types::DbId;
use meshforge_db::GenerationStore;
use meshforge_events::{EventBus, GenerationEvent};
use meshforge_provider::ProgressSink;

/// Maps the poll loop's stage-local progress into the stage's band, stores
/// it and broadcasts it.
pub(crate) struct StageProgress<'a> {
    pub store: &'a dyn GenerationStore,
    pub events: &'a EventBus,
    pub generation_id: DbId,
    pub owner_id: DbId,
    pub band: (i16, i16),
}

#[async_trait]
impl ProgressSink for StageProgress<'_> {
    async fn report(&self, local: i16) {
        let progress = scale_to_band(local, self.band);
        match self.store.update_progress(self.generation_id, progress).await {
            Ok(true) => self.events.publish(GenerationEvent::progress(
                self.generation_id,
                self.owner_id,
                progress,
            )),
            Ok(false) => tracing::debug!(
                generation_id = self.generation_id,
                progress,
                "Progress tick ignored; generation no longer in progress",
            ),
            Err(e) => tracing::warn!(
                generation_id = self.generation_id,
                progress,
                error = %e,
                "Failed to persist progress",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use meshforge_core::generation::{
        GenerationInput, GenerationStatus, NewGeneration, PipelineStage,
    };
    use meshforge_db::{MemoryStore, StatusUpdate};

    use super::*;

    #[tokio::test]
    async fn refine_ticks_land_in_upper_band() {
        let store = MemoryStore::new();
        let events = EventBus::default();
        let record = store
            .create_generation(&NewGeneration {
                owner_id: 1,
                input: GenerationInput::text("a lamp"),
            })
            .await
            .unwrap();
        store
            .transition(record.id, GenerationStatus::Pending, &StatusUpdate::in_progress())
            .await
            .unwrap();
        let mut rx = events.subscribe_to(record.id);

        let sink = StageProgress {
            store: &store,
            events: &events,
            generation_id: record.id,
            owner_id: 1,
            band: PipelineStage::Refine.progress_band(),
        };
        sink.report(0).await;
        sink.report(100).await;

        assert_eq!(rx.next().await.unwrap().progress_value(), Some(50));
        assert_eq!(rx.next().await.unwrap().progress_value(), Some(99));
        let stored = store.find_generation(record.id, 1).await.unwrap().unwrap();
        assert_eq!(stored.progress, 99);
    }
}
