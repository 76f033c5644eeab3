//! Row model for the `generated_assets` table.

use meshforge_core::asset::{AssetOutputs, GeneratedAsset};
use meshforge_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `generated_assets` table.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub id: DbId,
    pub generation_id: DbId,
    pub owner_id: DbId,
    pub glb_url: Option<String>,
    pub fbx_url: Option<String>,
    pub obj_url: Option<String>,
    pub mtl_url: Option<String>,
    pub usdz_url: Option<String>,
    pub base_color_url: Option<String>,
    pub metallic_url: Option<String>,
    pub normal_url: Option<String>,
    pub roughness_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub has_pbr: bool,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub is_favorite: bool,
    pub local_file_path: Option<String>,
}

impl From<AssetRow> for GeneratedAsset {
    fn from(row: AssetRow) -> Self {
        GeneratedAsset {
            id: row.id,
            generation_id: row.generation_id,
            owner_id: row.owner_id,
            outputs: AssetOutputs {
                glb_url: row.glb_url,
                fbx_url: row.fbx_url,
                obj_url: row.obj_url,
                mtl_url: row.mtl_url,
                usdz_url: row.usdz_url,
                base_color_url: row.base_color_url,
                metallic_url: row.metallic_url,
                normal_url: row.normal_url,
                roughness_url: row.roughness_url,
                thumbnail_url: row.thumbnail_url,
                video_url: row.video_url,
            },
            has_pbr: row.has_pbr,
            created_at: row.created_at,
            expires_at: row.expires_at,
            is_favorite: row.is_favorite,
            local_file_path: row.local_file_path,
        }
    }
}
