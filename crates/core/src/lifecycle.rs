//! Per-generation lifecycle state machine.
//!
//! ```text
//! Pending --JobCreated(first)--> InProgress(first, job started)
//! InProgress(s, started) --StageSucceeded(s)--> InProgress(next, awaiting job) | Succeeded
//! InProgress(s, awaiting) --JobCreated(s)--> InProgress(s, started)
//! Pending | InProgress --Failed--> Failed
//! Pending | InProgress --CancelRequested--> Canceled
//! ```
//!
//! [`GenerationState::apply`] is total: every `(state, event)` pair either
//! yields a [`Transition`] or a [`TransitionError`]. Terminal states reject
//! every event.

use serde::Serialize;

use crate::generation::{GenerationKind, GenerationStatus, PipelineStage};

/// In-memory lifecycle position of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationState {
    Pending,
    InProgress {
        stage: PipelineStage,
        /// Whether the provider job for `stage` exists yet.
        job_started: bool,
    },
    Succeeded,
    Failed,
    Canceled,
}

/// Something that happened to a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "stage", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The provider accepted the job for a stage.
    JobCreated(PipelineStage),
    /// The provider reported a stage's job as succeeded.
    StageSucceeded(PipelineStage),
    /// Job creation or polling failed.
    Failed,
    /// The owner asked to cancel.
    CancelRequested,
}

/// Work the orchestrator must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Persist the stage's task id and poll it to completion.
    PollStage(PipelineStage),
    /// Create the provider job for the next stage.
    SubmitStage(PipelineStage),
    /// Persist the asset, mark succeeded and settle the cost.
    Finalize,
    RecordFailure,
    RecordCancellation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: GenerationState,
    pub effect: Effect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("generation is already {}; no further transitions", .0.as_str())]
    Terminal(GenerationStatus),

    #[error("event {event:?} is not valid in state {state:?}")]
    Invalid {
        state: GenerationState,
        event: LifecycleEvent,
    },
}

impl GenerationState {
    /// Persisted status for this state.
    pub const fn status(self) -> GenerationStatus {
        match self {
            Self::Pending => GenerationStatus::Pending,
            Self::InProgress { .. } => GenerationStatus::InProgress,
            Self::Succeeded => GenerationStatus::Succeeded,
            Self::Failed => GenerationStatus::Failed,
            Self::Canceled => GenerationStatus::Canceled,
        }
    }

    pub const fn is_terminal(self) -> bool {
        self.status().is_terminal()
    }

    /// Stage currently owned by the pipeline, if any.
    pub const fn stage(self) -> Option<PipelineStage> {
        match self {
            Self::InProgress { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Apply `event` to a generation of `kind`.
    pub fn apply(
        self,
        kind: GenerationKind,
        event: LifecycleEvent,
    ) -> Result<Transition, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.status()));
        }
        let invalid = TransitionError::Invalid { state: self, event };

        let transition = match (self, event) {
            (_, LifecycleEvent::Failed) => Transition {
                next: Self::Failed,
                effect: Effect::RecordFailure,
            },
            (_, LifecycleEvent::CancelRequested) => Transition {
                next: Self::Canceled,
                effect: Effect::RecordCancellation,
            },
            (Self::Pending, LifecycleEvent::JobCreated(stage)) if stage == kind.first_stage() => {
                Transition {
                    next: Self::InProgress {
                        stage,
                        job_started: true,
                    },
                    effect: Effect::PollStage(stage),
                }
            }
            (
                Self::InProgress {
                    stage,
                    job_started: false,
                },
                LifecycleEvent::JobCreated(created),
            ) if created == stage => Transition {
                next: Self::InProgress {
                    stage,
                    job_started: true,
                },
                effect: Effect::PollStage(stage),
            },
            (
                Self::InProgress {
                    stage,
                    job_started: true,
                },
                LifecycleEvent::StageSucceeded(done),
            ) if done == stage => match kind.next_stage(stage) {
                Some(next) => Transition {
                    next: Self::InProgress {
                        stage: next,
                        job_started: false,
                    },
                    effect: Effect::SubmitStage(next),
                },
                None => Transition {
                    next: Self::Succeeded,
                    effect: Effect::Finalize,
                },
            },
            _ => return Err(invalid),
        };
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TEXT: GenerationKind = GenerationKind::TextToModel;
    const IMAGE: GenerationKind = GenerationKind::ImageToModel;

    fn started(stage: PipelineStage) -> GenerationState {
        GenerationState::InProgress {
            stage,
            job_started: true,
        }
    }

    #[test]
    fn image_pipeline_happy_path() {
        let t = GenerationState::Pending
            .apply(IMAGE, LifecycleEvent::JobCreated(PipelineStage::Single))
            .unwrap();
        assert_eq!(t.next, started(PipelineStage::Single));
        assert_eq!(t.effect, Effect::PollStage(PipelineStage::Single));

        let t = t
            .next
            .apply(IMAGE, LifecycleEvent::StageSucceeded(PipelineStage::Single))
            .unwrap();
        assert_eq!(t.next, GenerationState::Succeeded);
        assert_eq!(t.effect, Effect::Finalize);
    }

    #[test]
    fn text_pipeline_submits_refine_after_preview() {
        let t = started(PipelineStage::Preview)
            .apply(TEXT, LifecycleEvent::StageSucceeded(PipelineStage::Preview))
            .unwrap();
        assert_eq!(
            t.next,
            GenerationState::InProgress {
                stage: PipelineStage::Refine,
                job_started: false,
            }
        );
        assert_eq!(t.effect, Effect::SubmitStage(PipelineStage::Refine));

        let t = t
            .next
            .apply(TEXT, LifecycleEvent::JobCreated(PipelineStage::Refine))
            .unwrap();
        assert_eq!(t.effect, Effect::PollStage(PipelineStage::Refine));

        let t = t
            .next
            .apply(TEXT, LifecycleEvent::StageSucceeded(PipelineStage::Refine))
            .unwrap();
        assert_eq!(t.next, GenerationState::Succeeded);
    }

    #[test]
    fn refine_job_cannot_start_from_pending() {
        let err = GenerationState::Pending
            .apply(TEXT, LifecycleEvent::JobCreated(PipelineStage::Refine))
            .unwrap_err();
        assert_matches!(err, TransitionError::Invalid { .. });
    }

    #[test]
    fn cannot_finalize_from_pending() {
        let err = GenerationState::Pending
            .apply(IMAGE, LifecycleEvent::StageSucceeded(PipelineStage::Single))
            .unwrap_err();
        assert_matches!(err, TransitionError::Invalid { .. });
    }

    #[test]
    fn stage_cannot_succeed_before_its_job_exists() {
        let awaiting = GenerationState::InProgress {
            stage: PipelineStage::Refine,
            job_started: false,
        };
        assert!(awaiting
            .apply(TEXT, LifecycleEvent::StageSucceeded(PipelineStage::Refine))
            .is_err());
    }

    #[test]
    fn mismatched_stage_is_rejected() {
        assert!(started(PipelineStage::Preview)
            .apply(TEXT, LifecycleEvent::StageSucceeded(PipelineStage::Refine))
            .is_err());
    }

    #[test]
    fn pending_can_fail_or_cancel() {
        let t = GenerationState::Pending
            .apply(TEXT, LifecycleEvent::Failed)
            .unwrap();
        assert_eq!(t.next, GenerationState::Failed);
        assert_eq!(t.effect, Effect::RecordFailure);

        let t = GenerationState::Pending
            .apply(TEXT, LifecycleEvent::CancelRequested)
            .unwrap();
        assert_eq!(t.next, GenerationState::Canceled);
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for state in [
            GenerationState::Succeeded,
            GenerationState::Failed,
            GenerationState::Canceled,
        ] {
            for event in [
                LifecycleEvent::Failed,
                LifecycleEvent::CancelRequested,
                LifecycleEvent::JobCreated(PipelineStage::Single),
                LifecycleEvent::StageSucceeded(PipelineStage::Single),
            ] {
                assert_matches!(
                    state.apply(IMAGE, event),
                    Err(TransitionError::Terminal(_))
                );
            }
        }
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            started(PipelineStage::Refine).status(),
            GenerationStatus::InProgress
        );
        assert_eq!(started(PipelineStage::Refine).stage(), Some(PipelineStage::Refine));
        assert_eq!(GenerationState::Pending.stage(), None);
    }
}
