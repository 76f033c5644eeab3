//! Generation orchestration.
//!
//! [`GenerationOrchestrator`] turns a [`GenerationInput`](meshforge_core::generation::GenerationInput)
//! into a terminal generation record: it checks preconditions, reserves
//! credits, drives one or two provider stages through the poll loop, and
//! records the asset and the charge on success.

pub mod error;
pub mod identity;
pub mod orchestrator;
mod progress;

pub use error::{GenerationError, PreconditionError};
pub use identity::{IdentityProvider, StaticIdentity};
pub use orchestrator::{
    GenerationHandle, GenerationOrchestrator, GenerationOutcome, OrchestratorConfig,
};
