//! Message type names for generation events broadcast to observers.
//!
//! Used by `meshforge-events` as the `type` tag of serialized events.

/// Display progress changed (every poll tick and stage transition).
pub const MSG_TYPE_GENERATION_PROGRESS: &str = "generation_progress";

/// A provider job was created for a stage.
pub const MSG_TYPE_GENERATION_STAGE_STARTED: &str = "generation_stage_started";

/// Generation succeeded and its asset was stored.
pub const MSG_TYPE_GENERATION_COMPLETED: &str = "generation_completed";

/// Generation failed with an error.
pub const MSG_TYPE_GENERATION_FAILED: &str = "generation_failed";

/// Generation was canceled by its owner.
pub const MSG_TYPE_GENERATION_CANCELED: &str = "generation_canceled";
