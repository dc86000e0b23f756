//! Translation of sampling config parameters into pipeline arguments

use serde_json::{Map, Value};

use crate::config::SampleConcept;

/// Config-side parameter names and the pipeline argument each maps to
pub const PARAM_RENAMES: &[(&str, &str)] = &[
    ("cfg_scale", "guidance_scale"),
    ("steps", "num_inference_steps"),
];

/// Apply [`PARAM_RENAMES`]. A parameter already given under its pipeline
/// name wins over its alias.
pub fn rename_params(params: &Map<String, Value>) -> Map<String, Value> {
    let mut renamed = Map::new();

    for (key, value) in params {
        if let Some((_, target)) = PARAM_RENAMES.iter().find(|(alias, _)| alias == key) {
            renamed.insert((*target).to_string(), value.clone());
        }
    }
    for (key, value) in params {
        if !PARAM_RENAMES.iter().any(|(alias, _)| alias == key) {
            renamed.insert(key.clone(), value.clone());
        }
    }

    renamed
}

/// Arguments for one pipeline call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,
    /// Number of images to produce in this call
    pub num_images_per_prompt: usize,
    /// Remaining pipeline arguments, already renamed
    pub params: Map<String, Value>,
}

impl GenerationRequest {
    /// Request `num_images` images for `concept`
    pub fn for_concept(concept: &SampleConcept, num_images: usize) -> Self {
        Self {
            prompt: concept.prompt.clone(),
            num_images_per_prompt: num_images,
            params: rename_params(&concept.params),
        }
    }

    /// Raw pipeline argument
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Classifier-free guidance strength
    pub fn guidance_scale(&self) -> Option<f64> {
        self.param("guidance_scale").and_then(Value::as_f64)
    }

    /// Number of denoising steps
    pub fn num_inference_steps(&self) -> Option<usize> {
        self.param("num_inference_steps")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }

    /// Negative prompt, if any
    pub fn negative_prompt(&self) -> Option<&str> {
        self.param("negative_prompt").and_then(Value::as_str)
    }
}
