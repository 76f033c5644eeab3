//! Generation provider REST client and task polling.
//!
//! The provider is reached only through a trusted proxy that injects the
//! provider credential; nothing in this crate holds a secret.
//!
//! - [`api`]: [`ProviderApi`](api::ProviderApi), the reqwest-backed client.
//! - [`client`]: the [`TaskClient`](client::TaskClient) seam used by the pipeline.
//! - [`messages`]: typed request and task snapshot wire formats.
//! - [`poll`]: polling a task to completion with smoothed progress.

pub mod api;
pub mod client;
pub mod messages;
pub mod poll;

pub use api::{ProviderApi, ProviderError};
pub use client::TaskClient;
pub use messages::{ImageJobRequest, StageJob, TaskPhase, TaskSnapshot, TextJobRequest};
pub use poll::{poll_task, PollConfig, PollError, ProgressSink};
