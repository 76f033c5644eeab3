//! Status ids stored in SMALLINT lookup columns.

use meshforge_core::generation::GenerationStatus;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

/// Terminal statuses: succeeded, failed, canceled.
pub const TERMINAL_STATUSES: [StatusId; 3] = [
    GenerationStatus::Succeeded as StatusId,
    GenerationStatus::Failed as StatusId,
    GenerationStatus::Canceled as StatusId,
];
