//! Generated assets: the downloadable outputs of a successful generation.
//!
//! Provider-hosted URIs may expire. Consumers check
//! [`GeneratedAsset::availability`] and treat [`AssetAvailability::NeedsRefetch`]
//! as a recoverable condition.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// Output URIs declared by a finished provider task.
///
/// Any field may be absent; absent outputs are never replaced by
/// placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutputs {
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
}

impl AssetOutputs {
    /// A metallic map only ships with physically based texture sets.
    pub fn has_pbr(&self) -> bool {
        self.metallic_url.is_some()
    }

    /// Best model URI for display, preferring AR-ready formats.
    pub fn preferred_model_url(&self) -> Option<&str> {
        self.usdz_url
            .as_deref()
            .or(self.glb_url.as_deref())
            .or(self.fbx_url.as_deref())
            .or(self.obj_url.as_deref())
    }
}

/// Whether an asset's provider-hosted URIs can still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetAvailability {
    Available,
    /// URIs are past their expiry and must be fetched again.
    NeedsRefetch,
}

/// A persisted generated asset. Created once per successful generation and
/// never modified by the pipeline afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub id: DbId,
    pub generation_id: DbId,
    pub owner_id: DbId,
    #[serde(flatten)]
    pub outputs: AssetOutputs,
    pub has_pbr: bool,
    pub created_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    /// Gallery-owned.
    pub is_favorite: bool,
    /// Gallery-owned download cache location.
    pub local_file_path: Option<String>,
}

impl GeneratedAsset {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }

    pub fn availability(&self, now: Timestamp) -> AssetAvailability {
        if self.is_expired(now) {
            AssetAvailability::NeedsRefetch
        } else {
            AssetAvailability::Available
        }
    }

    pub fn preferred_model_url(&self) -> Option<&str> {
        self.outputs.preferred_model_url()
    }
}

/// Insert DTO for a new asset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAsset {
    pub generation_id: DbId,
    pub owner_id: DbId,
    pub outputs: AssetOutputs,
    pub expires_at: Option<Timestamp>,
}
