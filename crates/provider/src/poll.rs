//! Polling a provider task to a terminal status.
//!
//! [`poll_task`] checks a task at a fixed cadence, reports smoothed
//! progress to a [`ProgressSink`] after every check, and returns the final
//! snapshot on success. It never writes generation state itself; status
//! transitions belong to the caller.

use std::time::Duration;

use async_trait::async_trait;
use meshforge_core::progress::{smooth_progress, COMPLETE_PROGRESS};
use tokio_util::sync::CancellationToken;

use crate::api::ProviderError;
use crate::client::TaskClient;
use crate::messages::{TaskPhase, TaskSnapshot};

/// Default number of status checks before giving up on a task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 120;
/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Cadence and budget for one poll loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollConfig {
    /// Worst-case wall-clock time this config allows a stage.
    pub fn timeout(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Receives display progress after every poll, in poll order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, progress: i16);
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The provider reported the task as failed or canceled.
    #[error("{message}")]
    TaskFailed { message: String },

    #[error("Generation timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    /// The caller abandoned the loop.
    #[error("Polling was cancelled")]
    Cancelled,
}

/// Poll `task_id` until it reaches a terminal status.
///
/// - Success reports 100 to `sink` and returns at once.
/// - Provider failure or cancellation yields [`PollError::TaskFailed`].
/// - Transport and API errors from any single check propagate unchanged.
/// - Exhausting `config.max_attempts` yields [`PollError::Timeout`].
/// - Triggering `cancel` stops the loop before the next check.
pub async fn poll_task(
    client: &dyn TaskClient,
    task_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> Result<TaskSnapshot, PollError> {
    let mut displayed: i16 = 0;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            tracing::debug!(task_id, attempt, "Poll loop cancelled");
            return Err(PollError::Cancelled);
        }

        let snapshot = client.get_task(task_id).await?;

        match snapshot.phase() {
            TaskPhase::Succeeded => {
                sink.report(COMPLETE_PROGRESS).await;
                tracing::info!(task_id, attempt, "Provider task succeeded");
                return Ok(snapshot);
            }
            TaskPhase::Failed | TaskPhase::Canceled => {
                let message = snapshot.failure_message();
                tracing::warn!(
                    task_id,
                    attempt,
                    status = %snapshot.status,
                    error = %message,
                    "Provider task did not succeed",
                );
                return Err(PollError::TaskFailed { message });
            }
            TaskPhase::Pending | TaskPhase::Running => {
                displayed = smooth_progress(displayed, snapshot.progress, &mut rand::rng());
                tracing::debug!(
                    task_id,
                    attempt,
                    max_attempts = config.max_attempts,
                    raw_progress = ?snapshot.progress,
                    progress = displayed,
                    "Provider task still running",
                );
                sink.report(displayed).await;
            }
        }

        if attempt < config.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(task_id, attempt, "Poll loop cancelled while waiting");
                    return Err(PollError::Cancelled);
                }
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    tracing::warn!(task_id, attempts = config.max_attempts, "Provider task timed out");
    Err(PollError::Timeout {
        attempts: config.max_attempts,
    })
}
