//! Meshforge generation event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`GenerationEvent`]: the event envelope observers receive.
//!
//! Delivery is best-effort: slow subscribers may miss ticks, and nothing
//! is persisted. The durable record lives in the generation store.

pub mod bus;

pub use bus::{EventBus, GenerationEvent, GenerationEventKind, GenerationEvents};
