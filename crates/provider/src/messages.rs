//! Provider proxy request and response types.
//!
//! Job creation returns `{"result": "<task id>"}`; status lookups return a
//! task snapshot whose timestamps are epoch milliseconds.

use chrono::DateTime;
use meshforge_core::asset::AssetOutputs;
use meshforge_core::generation::{AiModel, ArtStyle, GenerationInput, PipelineStage};
use meshforge_core::types::Timestamp;
use serde::{Deserialize, Serialize};

use crate::api::ProviderError;

/// Message stored when the provider fails a task without saying why.
pub const UNKNOWN_TASK_ERROR: &str = "Unknown error";

// ---------------------------------------------------------------------------
// Job requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextJobMode {
    Preview,
    Refine,
}

/// Body of `POST /createTextJob`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextJobRequest {
    pub mode: TextJobMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art_style: Option<ArtStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<AiModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_polycount: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_pbr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_remesh: Option<bool>,
}

impl TextJobRequest {
    /// Preview (untextured mesh) job for a text request.
    pub fn preview(input: &GenerationInput) -> Self {
        Self {
            mode: TextJobMode::Preview,
            prompt: input.prompt.clone(),
            negative_prompt: input.negative_prompt.clone(),
            preview_task_id: None,
            art_style: Some(input.art_style),
            ai_model: Some(input.ai_model),
            target_polycount: Some(input.target_polycount),
            enable_pbr: None,
            texture_prompt: None,
            should_remesh: Some(input.should_remesh),
        }
    }

    /// Refine (texturing) job over a finished preview task.
    pub fn refine(input: &GenerationInput, preview_task_id: impl Into<String>) -> Self {
        Self {
            mode: TextJobMode::Refine,
            prompt: None,
            negative_prompt: None,
            preview_task_id: Some(preview_task_id.into()),
            art_style: None,
            ai_model: Some(input.ai_model),
            target_polycount: None,
            enable_pbr: Some(input.enable_pbr),
            texture_prompt: input.texture_prompt.clone(),
            should_remesh: None,
        }
    }

    /// Check the fields the proxy cannot default.
    pub fn validate(&self) -> Result<(), ProviderError> {
        match self.mode {
            TextJobMode::Preview if is_blank(self.prompt.as_deref()) => Err(
                ProviderError::InvalidRequest("preview job requires a prompt".into()),
            ),
            TextJobMode::Refine if is_blank(self.preview_task_id.as_deref()) => Err(
                ProviderError::InvalidRequest("refine job requires preview_task_id".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Body of `POST /createImageJob`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageJobRequest {
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<AiModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_pbr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_texture: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_polycount: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub texture_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub should_remesh: Option<bool>,
}

impl ImageJobRequest {
    pub fn from_input(input: &GenerationInput) -> Self {
        Self {
            image_url: input.image_url.clone().unwrap_or_default(),
            ai_model: Some(input.ai_model),
            enable_pbr: Some(input.enable_pbr),
            should_texture: Some(input.should_texture),
            target_polycount: Some(input.target_polycount),
            texture_prompt: input.texture_prompt.clone(),
            should_remesh: Some(input.should_remesh),
        }
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        let url = self.image_url.trim();
        if url.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "image job requires image_url".into(),
            ));
        }
        if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with("data:")) {
            return Err(ProviderError::InvalidRequest(format!(
                "image_url '{url}' is not an http(s) or data URI"
            )));
        }
        Ok(())
    }
}

/// The provider job that runs a given pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageJob {
    Text(TextJobRequest),
    Image(ImageJobRequest),
}

impl StageJob {
    /// Build the job for `stage`. Refine needs the preview's task id.
    pub fn for_stage(
        stage: PipelineStage,
        input: &GenerationInput,
        preview_task_id: Option<&str>,
    ) -> Self {
        match stage {
            PipelineStage::Preview => Self::Text(TextJobRequest::preview(input)),
            PipelineStage::Refine => Self::Text(TextJobRequest::refine(
                input,
                preview_task_id.unwrap_or_default(),
            )),
            PipelineStage::Single => Self::Image(ImageJobRequest::from_input(input)),
        }
    }
}

/// Response of both job-creation endpoints.
#[derive(Debug, Deserialize)]
pub struct CreateJobResponse {
    /// Provider-assigned task identifier.
    pub result: String,
}

// ---------------------------------------------------------------------------
// Task snapshot
// ---------------------------------------------------------------------------

/// Model files produced by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUrls {
    pub glb: Option<String>,
    pub fbx: Option<String>,
    pub obj: Option<String>,
    pub mtl: Option<String>,
    pub usdz: Option<String>,
}

/// One texture set produced by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureUrls {
    pub base_color: Option<String>,
    pub metallic: Option<String>,
    pub normal: Option<String>,
    pub roughness: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: Option<String>,
}

/// Response of `GET /getTask?taskId=<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    /// Raw provider status string, e.g. `"IN_PROGRESS"`.
    pub status: String,
    pub progress: Option<i16>,
    pub model_urls: Option<ModelUrls>,
    pub texture_urls: Option<Vec<TextureUrls>>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub task_error: Option<TaskError>,
    pub created_at: Option<i64>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub expires_at: Option<i64>,
}

/// Provider status, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskPhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl TaskSnapshot {
    /// Classify the raw status. Unknown strings count as still running.
    pub fn phase(&self) -> TaskPhase {
        match self.status.trim().to_ascii_uppercase().as_str() {
            "SUCCEEDED" => TaskPhase::Succeeded,
            "FAILED" | "EXPIRED" => TaskPhase::Failed,
            "CANCELED" | "CANCELLED" => TaskPhase::Canceled,
            "PENDING" => TaskPhase::Pending,
            _ => TaskPhase::Running,
        }
    }

    /// Provider error text, or a generic message when it gave none.
    pub fn failure_message(&self) -> String {
        self.task_error
            .as_ref()
            .and_then(|e| e.message.as_deref())
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_TASK_ERROR)
            .to_string()
    }

    /// Output URIs declared by the task. Textures come from the first set.
    pub fn asset_outputs(&self) -> AssetOutputs {
        let models = self.model_urls.clone().unwrap_or_default();
        let textures = self
            .texture_urls
            .as_ref()
            .and_then(|sets| sets.first().cloned())
            .unwrap_or_default();
        AssetOutputs {
            glb_url: models.glb,
            fbx_url: models.fbx,
            obj_url: models.obj,
            mtl_url: models.mtl,
            usdz_url: models.usdz,
            base_color_url: textures.base_color,
            metallic_url: textures.metallic,
            normal_url: textures.normal,
            roughness_url: textures.roughness,
            thumbnail_url: self.thumbnail_url.clone(),
            video_url: self.video_url.clone(),
        }
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at.and_then(DateTime::from_timestamp_millis)
    }

    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finished_at.and_then(DateTime::from_timestamp_millis)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn snapshot(json: &str) -> TaskSnapshot {
        serde_json::from_str(json).expect("valid snapshot")
    }

    #[test]
    fn preview_request_omits_refine_fields() {
        let input = GenerationInput::text("a teapot");
        let body = serde_json::to_value(TextJobRequest::preview(&input)).unwrap();
        assert_eq!(body["mode"], "preview");
        assert_eq!(body["prompt"], "a teapot");
        assert_eq!(body["art_style"], "realistic");
        assert_eq!(body["ai_model"], "latest");
        assert_eq!(body["target_polycount"], 30000);
        assert_eq!(body["should_remesh"], true);
        assert!(body.get("preview_task_id").is_none());
        assert!(body.get("enable_pbr").is_none());
    }

    #[test]
    fn refine_request_carries_preview_task() {
        let input = GenerationInput::text("a teapot")
            .with_pbr(true)
            .with_texture_prompt("glazed porcelain");
        let body = serde_json::to_value(TextJobRequest::refine(&input, "prev-1")).unwrap();
        assert_eq!(body["mode"], "refine");
        assert_eq!(body["preview_task_id"], "prev-1");
        assert_eq!(body["enable_pbr"], true);
        assert_eq!(body["texture_prompt"], "glazed porcelain");
        assert!(body.get("prompt").is_none());
    }

    #[test]
    fn text_requests_validate_required_fields() {
        let mut preview = TextJobRequest::preview(&GenerationInput::text("x"));
        assert!(preview.validate().is_ok());
        preview.prompt = Some("  ".into());
        assert_matches!(preview.validate(), Err(ProviderError::InvalidRequest(_)));

        let refine = TextJobRequest::refine(&GenerationInput::text("x"), "");
        assert_matches!(refine.validate(), Err(ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn image_request_requires_uri() {
        let ok = ImageJobRequest::from_input(&GenerationInput::image("https://cdn/a.png"));
        assert!(ok.validate().is_ok());

        let data_uri = ImageJobRequest::from_input(&GenerationInput::image("data:image/png;base64,AAAA"));
        assert!(data_uri.validate().is_ok());

        let bad = ImageJobRequest::from_input(&GenerationInput::image("ftp://x/a.png"));
        assert_matches!(bad.validate(), Err(ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn stage_job_dispatch() {
        let input = GenerationInput::text("owl");
        assert_matches!(
            StageJob::for_stage(PipelineStage::Preview, &input, None),
            StageJob::Text(TextJobRequest { mode: TextJobMode::Preview, .. })
        );
        assert_matches!(
            StageJob::for_stage(PipelineStage::Refine, &input, Some("p-9")),
            StageJob::Text(TextJobRequest { mode: TextJobMode::Refine, .. })
        );
        let image = GenerationInput::image("https://cdn/owl.png");
        assert_matches!(
            StageJob::for_stage(PipelineStage::Single, &image, None),
            StageJob::Image(_)
        );
    }

    #[test]
    fn phase_is_case_insensitive() {
        let mut s = snapshot(r#"{"id":"t","status":"SUCCEEDED"}"#);
        assert_eq!(s.phase(), TaskPhase::Succeeded);
        s.status = "succeeded".into();
        assert_eq!(s.phase(), TaskPhase::Succeeded);
        s.status = "CANCELED".into();
        assert_eq!(s.phase(), TaskPhase::Canceled);
        s.status = "IN_PROGRESS".into();
        assert_eq!(s.phase(), TaskPhase::Running);
        s.status = "PENDING".into();
        assert!(!s.phase().is_terminal());
    }

    #[test]
    fn failure_message_falls_back_to_generic() {
        let s = snapshot(r#"{"id":"t","status":"FAILED","task_error":{"message":"bad mesh"}}"#);
        assert_eq!(s.failure_message(), "bad mesh");

        let s = snapshot(r#"{"id":"t","status":"FAILED","task_error":{"message":""}}"#);
        assert_eq!(s.failure_message(), UNKNOWN_TASK_ERROR);

        let s = snapshot(r#"{"id":"t","status":"FAILED"}"#);
        assert_eq!(s.failure_message(), UNKNOWN_TASK_ERROR);
    }

    #[test]
    fn outputs_keep_absent_fields_absent() {
        let s = snapshot(
            r#"{
                "id": "t",
                "status": "SUCCEEDED",
                "progress": 100,
                "model_urls": {"glb": "https://cdn/m.glb", "usdz": "https://cdn/m.usdz"},
                "texture_urls": [
                    {"base_color": "https://cdn/bc.png", "metallic": "https://cdn/m.png"},
                    {"base_color": "https://cdn/ignored.png"}
                ],
                "thumbnail_url": "https://cdn/t.png",
                "expires_at": 1767225600000
            }"#,
        );
        let outputs = s.asset_outputs();
        assert_eq!(outputs.glb_url.as_deref(), Some("https://cdn/m.glb"));
        assert_eq!(outputs.fbx_url, None);
        assert_eq!(outputs.base_color_url.as_deref(), Some("https://cdn/bc.png"));
        assert!(outputs.has_pbr());
        assert_eq!(outputs.video_url, None);
        assert_eq!(
            s.expires_at().map(|t| t.timestamp()),
            Some(1_767_225_600)
        );
    }

    #[test]
    fn snapshot_without_outputs_yields_empty_outputs() {
        let s = snapshot(r#"{"id":"t","status":"SUCCEEDED"}"#);
        assert_eq!(s.asset_outputs(), AssetOutputs::default());
        assert_eq!(s.expires_at(), None);
    }
}
