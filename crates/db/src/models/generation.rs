//! Row model for the `generations` table.

use meshforge_core::generation::{
    GenerationInput, GenerationKind, GenerationRequest, GenerationStatus,
};
use meshforge_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use crate::models::status::StatusId;
use crate::store::StoreError;

/// A row from the `generations` table.
#[derive(Debug, Clone, FromRow)]
pub struct GenerationRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub kind: String,
    pub input: serde_json::Value,
    pub status_id: StatusId,
    pub progress: i16,
    pub task_id: Option<String>,
    pub preview_task_id: Option<String>,
    pub refine_task_id: Option<String>,
    pub asset_id: Option<DbId>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl TryFrom<GenerationRow> for GenerationRequest {
    type Error = StoreError;

    fn try_from(row: GenerationRow) -> Result<Self, Self::Error> {
        let kind = GenerationKind::try_from(row.kind.as_str())?;
        let input: GenerationInput = serde_json::from_value(row.input)?;
        if input.kind != kind {
            return Err(StoreError::Corrupt(format!(
                "generation {} has kind {} but input for {}",
                row.id,
                kind.as_str(),
                input.kind.as_str()
            )));
        }
        Ok(GenerationRequest {
            id: row.id,
            owner_id: row.owner_id,
            kind,
            input,
            status: GenerationStatus::try_from(row.status_id)?,
            progress: row.progress,
            task_id: row.task_id,
            preview_task_id: row.preview_task_id,
            refine_task_id: row.refine_task_id,
            asset_id: row.asset_id,
            thumbnail_url: row.thumbnail_url,
            video_url: row.video_url,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
