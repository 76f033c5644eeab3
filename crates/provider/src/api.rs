//! REST client for the generation provider proxy.
//!
//! Wraps the proxy's HTTP endpoints (text job creation, image job
//! creation, task lookup) using [`reqwest`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::client::TaskClient;
use crate::messages::{CreateJobResponse, ImageJobRequest, TaskSnapshot, TextJobRequest};

/// HTTP client for a provider proxy deployment.
#[derive(Clone)]
pub struct ProviderApi {
    client: reqwest::Client,
    base_url: String,
}

/// Errors from the provider REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// A required request field was missing or malformed; nothing was sent.
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The proxy or provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not match the expected shape.
    #[error("Malformed provider response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProviderApi {
    /// Create a new API client for a proxy deployment.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `https://region-project.cloudfunctions.net`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for sharing timeouts and connection pools).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a text preview or refine job.
    ///
    /// Sends `POST /createTextJob` and returns the provider task id.
    pub async fn create_text_job(&self, request: &TextJobRequest) -> Result<String, ProviderError> {
        request.validate()?;
        let response = self
            .client
            .post(format!("{}/createTextJob", self.base_url))
            .json(request)
            .send()
            .await?;

        let created: CreateJobResponse = Self::parse_response(response).await?;
        tracing::debug!(task_id = %created.result, mode = ?request.mode, "Text job created");
        Ok(created.result)
    }

    /// Submit an image job.
    ///
    /// Sends `POST /createImageJob` and returns the provider task id.
    pub async fn create_image_job(
        &self,
        request: &ImageJobRequest,
    ) -> Result<String, ProviderError> {
        request.validate()?;
        let response = self
            .client
            .post(format!("{}/createImageJob", self.base_url))
            .json(request)
            .send()
            .await?;

        let created: CreateJobResponse = Self::parse_response(response).await?;
        tracing::debug!(task_id = %created.result, "Image job created");
        Ok(created.result)
    }

    /// Retrieve the current snapshot of a task.
    ///
    /// Sends `GET /getTask?taskId=<id>`.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError> {
        if task_id.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("taskId is required".into()));
        }
        let response = self
            .client
            .get(format!("{}/getTask", self.base_url))
            .query(&[("taskId", task_id)])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ProviderError::Api`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    ///
    /// The body is read in full first so that shape mismatches surface as
    /// [`ProviderError::Decode`] rather than transport errors.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TaskClient for ProviderApi {
    async fn create_text_job(&self, request: &TextJobRequest) -> Result<String, ProviderError> {
        ProviderApi::create_text_job(self, request).await
    }

    async fn create_image_job(&self, request: &ImageJobRequest) -> Result<String, ProviderError> {
        ProviderApi::create_image_job(self, request).await
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskSnapshot, ProviderError> {
        ProviderApi::get_task(self, task_id).await
    }
}
