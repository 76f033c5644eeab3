//! Credit cost of a generation request.
//!
//! Cost is a pure function of the request parameters so the same value is
//! used for the balance check at submission and the debit on success.

use crate::generation::{GenerationInput, GenerationKind};
use crate::types::Credits;

/// Extra credits charged for textured output.
pub const TEXTURE_SURCHARGE: Credits = 10;

/// Breakdown of what a request will cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CostEstimate {
    pub model_cost: Credits,
    pub surcharge: Credits,
}

impl CostEstimate {
    pub fn total(self) -> Credits {
        self.model_cost + self.surcharge
    }
}

/// Estimate the credit cost of `input`.
///
/// Text requests pay the surcharge for PBR textures, image requests for
/// texturing; the base cost depends only on the model.
pub fn estimate_cost(input: &GenerationInput) -> CostEstimate {
    let textured = match input.kind {
        GenerationKind::TextToModel => input.enable_pbr,
        GenerationKind::ImageToModel => input.should_texture,
    };
    CostEstimate {
        model_cost: input.ai_model.credit_cost(),
        surcharge: if textured { TEXTURE_SURCHARGE } else { 0 },
    }
}
