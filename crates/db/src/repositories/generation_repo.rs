//! Repository for the `generations` table.
//!
//! Status writes are compare-and-set on `status_id`; every method that
//! changes a row returns the updated row, or `None` when the guard did not
//! match.

use meshforge_core::generation::{GenerationStatus, PipelineStage};
use meshforge_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::generation::GenerationRow;
use crate::models::status::{StatusId, TERMINAL_STATUSES};
use crate::repositories::clamp_limit;

/// Column list for `generations` queries.
const COLUMNS: &str = "\
    id, owner_id, kind, input, status_id, progress, \
    task_id, preview_task_id, refine_task_id, \
    asset_id, thumbnail_url, video_url, error_message, \
    created_at, updated_at, completed_at";

/// Column holding the provider task id of `stage`.
fn task_column(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Single => "task_id",
        PipelineStage::Preview => "preview_task_id",
        PipelineStage::Refine => "refine_task_id",
    }
}

pub struct GenerationRepo;

impl GenerationRepo {
    /// Insert a new pending generation.
    pub async fn create(
        pool: &PgPool,
        owner_id: DbId,
        kind: &str,
        input: &serde_json::Value,
    ) -> Result<GenerationRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO generations (owner_id, kind, input, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(owner_id)
            .bind(kind)
            .bind(input)
            .bind(GenerationStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find a generation by id regardless of owner. Internal use only.
    pub async fn find_by_id(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<GenerationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generations WHERE id = $1");
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_for_owner(
        pool: &PgPool,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<GenerationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generations WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    /// List an owner's generations, newest first.
    pub async fn list_for_owner(
        pool: &PgPool,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<GenerationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generations \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(owner_id)
            .bind(clamp_limit(limit))
            .fetch_all(pool)
            .await
    }

    /// Move a generation from `expected` to `status`.
    ///
    /// `completed_at` is stamped when `status` is terminal. An `error_message`
    /// of `None` leaves the stored message untouched.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        expected: GenerationStatus,
        status: GenerationStatus,
        error_message: Option<&str>,
    ) -> Result<Option<GenerationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE generations \
             SET status_id = $3, \
                 error_message = COALESCE($4, error_message), \
                 updated_at = NOW(), \
                 completed_at = CASE WHEN $3 = ANY($5) THEN NOW() ELSE completed_at END \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(id)
            .bind(expected.id())
            .bind(status.id())
            .bind(error_message)
            .bind(&TERMINAL_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// Raise progress on an in-progress generation. Never lowers it.
    pub async fn update_progress(
        pool: &PgPool,
        id: DbId,
        progress: i16,
    ) -> Result<Option<GenerationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE generations \
             SET progress = GREATEST(progress, $2), updated_at = NOW() \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(id)
            .bind(progress.clamp(0, 100))
            .bind(GenerationStatus::InProgress.id())
            .fetch_optional(pool)
            .await
    }

    /// Set the task id of `stage` if it is unset (or already equal) and the
    /// generation is not terminal.
    pub async fn record_task_id(
        pool: &PgPool,
        id: DbId,
        stage: PipelineStage,
        task_id: &str,
    ) -> Result<Option<GenerationRow>, sqlx::Error> {
        let column = task_column(stage);
        let query = format!(
            "UPDATE generations \
             SET {column} = $2, updated_at = NOW() \
             WHERE id = $1 \
               AND status_id <> ALL($3) \
               AND ({column} IS NULL OR {column} = $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(id)
            .bind(task_id)
            .bind(&TERMINAL_STATUSES[..])
            .fetch_optional(pool)
            .await
    }

    /// Lock a generation row for the rest of `tx` and return its status.
    pub async fn lock_status(
        tx: &mut Transaction<'_, Postgres>,
        id: DbId,
    ) -> Result<Option<StatusId>, sqlx::Error> {
        sqlx::query_scalar::<_, StatusId>(
            "SELECT status_id FROM generations WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Mark a locked generation succeeded and link its asset.
    pub async fn mark_succeeded(
        tx: &mut Transaction<'_, Postgres>,
        id: DbId,
        asset_id: DbId,
        thumbnail_url: Option<&str>,
        video_url: Option<&str>,
    ) -> Result<GenerationRow, sqlx::Error> {
        let query = format!(
            "UPDATE generations \
             SET status_id = $2, progress = 100, asset_id = $3, \
                 thumbnail_url = $4, video_url = $5, \
                 updated_at = NOW(), completed_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRow>(&query)
            .bind(id)
            .bind(GenerationStatus::Succeeded.id())
            .bind(asset_id)
            .bind(thumbnail_url)
            .bind(video_url)
            .fetch_one(&mut **tx)
            .await
    }
}
