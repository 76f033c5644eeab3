//! Domain types and pure logic shared by every meshforge crate.
//!
//! - [`generation`]: generation requests, inputs, stages and statuses.
//! - [`lifecycle`]: the per-generation state machine.
//! - [`asset`]: generated asset records and expiry handling.
//! - [`progress`]: display-progress smoothing for coarse provider progress.
//! - [`estimation`]: deterministic credit cost of a request.

pub mod asset;
pub mod error;
pub mod estimation;
pub mod generation;
pub mod generation_events;
pub mod lifecycle;
pub mod progress;
pub mod types;
