//! The task-client seam between the pipeline and the provider.
//!
//! [`ProviderApi`](crate::api::ProviderApi) is the production
//! implementation; tests substitute scripted clients.

use async_trait::async_trait;

use crate::api::ProviderError;
use crate::messages::{ImageJobRequest, StageJob, TaskSnapshot, TextJobRequest};

/// Stateless job-creation and status-lookup calls against the provider.
#[async_trait]
pub trait TaskClient: Send + Sync {
    /// Create a text preview or refine job. Returns the provider task id.
    async fn create_text_job(&self, request: &TextJobRequest) -> Result<String, ProviderError>;

    /// Create an image job. Returns the provider task id.
    async fn create_image_job(&self, request: &ImageJobRequest) -> Result<String, ProviderError>;

    /// Fetch the current snapshot of a task.
    async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError>;

    /// Create whichever job `job` describes.
    async fn create_job(&self, job: &StageJob) -> Result<String, ProviderError> {
        match job {
            StageJob::Text(request) => self.create_text_job(request).await,
            StageJob::Image(request) => self.create_image_job(request).await,
        }
    }
}
