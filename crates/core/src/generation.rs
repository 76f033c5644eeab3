//! Generation requests: inputs, pipeline shape, and persisted status.
//!
//! A [`GenerationRequest`] is the durable unit of work. Its
//! [`GenerationKind`] decides how many provider stages run: text prompts
//! go through preview then refine, images run a single stage.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Target polycount sent to the provider when the caller does not set one.
pub const DEFAULT_TARGET_POLYCOUNT: i32 = 30_000;
/// Lowest polycount the provider accepts.
pub const MIN_TARGET_POLYCOUNT: i32 = 100;
/// Highest polycount the provider accepts.
pub const MAX_TARGET_POLYCOUNT: i32 = 300_000;
/// Maximum prompt length accepted by the provider.
pub const MAX_PROMPT_LEN: u64 = 600;
/// Default page size for generation listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Kind and stages
// ---------------------------------------------------------------------------

/// What the user asked to turn into a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    TextToModel,
    ImageToModel,
}

impl GenerationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TextToModel => "text_to_model",
            Self::ImageToModel => "image_to_model",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TextToModel => "Text to 3D",
            Self::ImageToModel => "Image to 3D",
        }
    }

    /// Provider stages run for this kind, in order.
    pub const fn stages(self) -> &'static [PipelineStage] {
        match self {
            Self::TextToModel => &[PipelineStage::Preview, PipelineStage::Refine],
            Self::ImageToModel => &[PipelineStage::Single],
        }
    }

    pub const fn first_stage(self) -> PipelineStage {
        self.stages()[0]
    }

    /// The stage that follows `stage`, or `None` when `stage` is the last.
    pub fn next_stage(self, stage: PipelineStage) -> Option<PipelineStage> {
        let stages = self.stages();
        let position = stages.iter().position(|s| *s == stage)?;
        stages.get(position + 1).copied()
    }

    pub fn owns_stage(self, stage: PipelineStage) -> bool {
        self.stages().contains(&stage)
    }
}

impl TryFrom<&str> for GenerationKind {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "text_to_model" => Ok(Self::TextToModel),
            "image_to_model" => Ok(Self::ImageToModel),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

/// One provider job within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Untextured draft mesh from a text prompt.
    Preview,
    /// Texturing pass over a finished preview.
    Refine,
    /// The only job of an image pipeline.
    Single,
}

impl PipelineStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Refine => "refine",
            Self::Single => "single",
        }
    }

    /// Slice of the record's 0-100 progress owned by this stage.
    ///
    /// The final stage stops at 99; only finalization writes 100.
    pub const fn progress_band(self) -> (i16, i16) {
        match self {
            Self::Preview => (0, 50),
            Self::Refine => (50, 99),
            Self::Single => (0, 99),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Persisted lifecycle status of a generation.
///
/// Discriminants match the seed order of the `generation_statuses` table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending = 1,
    InProgress = 2,
    Succeeded = 3,
    Failed = 4,
    Canceled = 5,
}

impl GenerationStatus {
    /// Return the database status ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Succeeded, failed and canceled records never change status again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl TryFrom<i16> for GenerationStatus {
    type Error = CoreError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Pending),
            2 => Ok(Self::InProgress),
            3 => Ok(Self::Succeeded),
            4 => Ok(Self::Failed),
            5 => Ok(Self::Canceled),
            other => Err(CoreError::UnknownStatus(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Model parameters
// ---------------------------------------------------------------------------

/// Provider model generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AiModel {
    #[serde(rename = "meshy-4")]
    Meshy4,
    #[serde(rename = "meshy-5")]
    Meshy5,
    #[serde(rename = "meshy-6")]
    Meshy6,
    #[default]
    #[serde(rename = "latest")]
    Latest,
}

impl AiModel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meshy4 => "meshy-4",
            Self::Meshy5 => "meshy-5",
            Self::Meshy6 => "meshy-6",
            Self::Latest => "latest",
        }
    }

    /// Base credit cost of one generation with this model.
    pub const fn credit_cost(self) -> i64 {
        match self {
            Self::Meshy6 => 20,
            _ => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtStyle {
    #[default]
    Realistic,
    Sculpture,
}

impl ArtStyle {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Realistic => "realistic",
            Self::Sculpture => "sculpture",
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Immutable parameters of a generation, captured at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_kind_inputs"))]
pub struct GenerationInput {
    pub kind: GenerationKind,
    #[validate(length(min = 1, max = MAX_PROMPT_LEN))]
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub art_style: ArtStyle,
    #[serde(default)]
    pub ai_model: AiModel,
    #[serde(default = "default_polycount")]
    #[validate(range(min = MIN_TARGET_POLYCOUNT, max = MAX_TARGET_POLYCOUNT))]
    pub target_polycount: i32,
    /// Physically based textures (text pipeline surcharge).
    #[serde(default)]
    pub enable_pbr: bool,
    /// Texture the mesh (image pipeline surcharge).
    #[serde(default)]
    pub should_texture: bool,
    pub texture_prompt: Option<String>,
    #[serde(default = "default_remesh")]
    pub should_remesh: bool,
}

fn default_polycount() -> i32 {
    DEFAULT_TARGET_POLYCOUNT
}

fn default_remesh() -> bool {
    true
}

fn validate_kind_inputs(input: &GenerationInput) -> Result<(), ValidationError> {
    let missing = match input.kind {
        GenerationKind::TextToModel => blank(input.prompt.as_deref()).then_some("prompt"),
        GenerationKind::ImageToModel => blank(input.image_url.as_deref()).then_some("image_url"),
    };
    match missing {
        Some(field) => Err(ValidationError::new("required_for_kind").with_message(
            Cow::Owned(format!("{field} is required for {}", input.kind.as_str())),
        )),
        None => Ok(()),
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

impl GenerationInput {
    /// Text prompt request with default model parameters.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            kind: GenerationKind::TextToModel,
            prompt: Some(prompt.into()),
            negative_prompt: None,
            image_url: None,
            art_style: ArtStyle::default(),
            ai_model: AiModel::default(),
            target_polycount: DEFAULT_TARGET_POLYCOUNT,
            enable_pbr: false,
            should_texture: false,
            texture_prompt: None,
            should_remesh: true,
        }
    }

    /// Image request with default model parameters.
    pub fn image(image_url: impl Into<String>) -> Self {
        Self {
            kind: GenerationKind::ImageToModel,
            prompt: None,
            image_url: Some(image_url.into()),
            ..Self::text(String::new())
        }
    }

    pub fn with_model(mut self, ai_model: AiModel) -> Self {
        self.ai_model = ai_model;
        self
    }

    pub fn with_pbr(mut self, enable_pbr: bool) -> Self {
        self.enable_pbr = enable_pbr;
        self
    }

    pub fn with_texture(mut self, should_texture: bool) -> Self {
        self.should_texture = should_texture;
        self
    }

    pub fn with_texture_prompt(mut self, texture_prompt: impl Into<String>) -> Self {
        self.texture_prompt = Some(texture_prompt.into());
        self
    }

    /// Run field and per-kind validation.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A persisted generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: DbId,
    pub owner_id: DbId,
    pub kind: GenerationKind,
    pub input: GenerationInput,
    pub status: GenerationStatus,
    pub progress: i16,
    /// Provider task of a single-stage pipeline.
    pub task_id: Option<String>,
    pub preview_task_id: Option<String>,
    pub refine_task_id: Option<String>,
    /// The asset produced on success.
    pub asset_id: Option<DbId>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl GenerationRequest {
    /// Provider task id recorded for `stage`, if that stage has started.
    pub fn task_id_for(&self, stage: PipelineStage) -> Option<&str> {
        match stage {
            PipelineStage::Single => self.task_id.as_deref(),
            PipelineStage::Preview => self.preview_task_id.as_deref(),
            PipelineStage::Refine => self.refine_task_id.as_deref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Insert DTO for a new pending generation.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub owner_id: DbId,
    pub input: GenerationInput,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
