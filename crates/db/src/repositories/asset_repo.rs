//! Repository for the `generated_assets` table.
//!
//! Assets are inserted once, inside the transaction that marks their
//! generation succeeded, and never updated by the pipeline.

use meshforge_core::asset::NewAsset;
use meshforge_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::asset::AssetRow;
use crate::repositories::clamp_limit;

/// Column list for `generated_assets` queries.
const COLUMNS: &str = "\
    id, generation_id, owner_id, \
    glb_url, fbx_url, obj_url, mtl_url, usdz_url, \
    base_color_url, metallic_url, normal_url, roughness_url, \
    thumbnail_url, video_url, has_pbr, \
    created_at, expires_at, is_favorite, local_file_path";

pub struct AssetRepo;

impl AssetRepo {
    /// Insert the asset of a generation within an open transaction.
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        asset: &NewAsset,
    ) -> Result<AssetRow, sqlx::Error> {
        let outputs = &asset.outputs;
        let query = format!(
            "INSERT INTO generated_assets (\
                generation_id, owner_id, \
                glb_url, fbx_url, obj_url, mtl_url, usdz_url, \
                base_color_url, metallic_url, normal_url, roughness_url, \
                thumbnail_url, video_url, has_pbr, expires_at\
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(asset.generation_id)
            .bind(asset.owner_id)
            .bind(outputs.glb_url.as_deref())
            .bind(outputs.fbx_url.as_deref())
            .bind(outputs.obj_url.as_deref())
            .bind(outputs.mtl_url.as_deref())
            .bind(outputs.usdz_url.as_deref())
            .bind(outputs.base_color_url.as_deref())
            .bind(outputs.metallic_url.as_deref())
            .bind(outputs.normal_url.as_deref())
            .bind(outputs.roughness_url.as_deref())
            .bind(outputs.thumbnail_url.as_deref())
            .bind(outputs.video_url.as_deref())
            .bind(outputs.has_pbr())
            .bind(asset.expires_at)
            .fetch_one(&mut **tx)
            .await
    }

    pub async fn find_for_owner(
        pool: &PgPool,
        id: DbId,
        owner_id: DbId,
    ) -> Result<Option<AssetRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM generated_assets WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_generation(
        pool: &PgPool,
        generation_id: DbId,
        owner_id: DbId,
    ) -> Result<Option<AssetRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generated_assets \
             WHERE generation_id = $1 AND owner_id = $2"
        );
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(generation_id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    /// List an owner's assets, newest first.
    pub async fn list_for_owner(
        pool: &PgPool,
        owner_id: DbId,
        limit: i64,
    ) -> Result<Vec<AssetRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM generated_assets \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, AssetRow>(&query)
            .bind(owner_id)
            .bind(clamp_limit(limit))
            .fetch_all(pool)
            .await
    }
}
