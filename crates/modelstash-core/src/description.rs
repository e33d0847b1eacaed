//! Serializable model descriptions for API responses and cache markers

use serde::{Deserialize, Serialize};

use crate::model::{ModelFormat, ModelHub, ModelSize};
use crate::spec::ModelSpec;

/// Whether a model is cached: one flag, or one per declared quantization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheStatus {
    Single(bool),
    PerQuantization(Vec<bool>),
}

impl CacheStatus {
    /// True if anything usable is cached
    pub fn any(&self) -> bool {
        match self {
            CacheStatus::Single(cached) => *cached,
            CacheStatus::PerQuantization(flags) => flags.iter().any(|f| *f),
        }
    }
}

/// Human-readable description of a model, keyed by model type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type")]
pub enum ModelDescription {
    #[serde(rename = "LLM")]
    Llm {
        model_name: String,
        model_lang: Vec<String>,
        model_ability: Vec<String>,
        model_description: Option<String>,
        model_family: Option<String>,
        context_length: u32,
        model_format: ModelFormat,
        model_size_in_billions: ModelSize,
        quantization: Option<String>,
        model_hub: ModelHub,
        model_revision: Option<String>,
    },
    #[serde(rename = "embedding")]
    Embedding {
        model_name: String,
        dimensions: u32,
        max_tokens: u32,
        language: Vec<String>,
        model_revision: Option<String>,
    },
    #[serde(rename = "audio")]
    Audio {
        model_name: String,
        model_family: String,
        multilingual: bool,
        model_revision: Option<String>,
    },
    #[serde(rename = "image")]
    Image {
        model_name: String,
        model_family: String,
        controlnet: Vec<String>,
        model_revision: Option<String>,
    },
}

impl From<&ModelSpec> for ModelDescription {
    fn from(spec: &ModelSpec) -> Self {
        match spec {
            ModelSpec::Llm(s) => ModelDescription::Llm {
                model_name: s.model_name.clone(),
                model_lang: s.model_lang.clone(),
                model_ability: s.model_ability.clone(),
                model_description: s.model_description.clone(),
                model_family: s.model_family.clone(),
                context_length: s.context_length,
                model_format: s.variant.model_format,
                model_size_in_billions: s.variant.model_size_in_billions.clone(),
                quantization: s.quantization.clone(),
                model_hub: s.variant.source.model_hub(),
                model_revision: s.variant.model_revision.clone(),
            },
            ModelSpec::Embedding(s) => ModelDescription::Embedding {
                model_name: s.model_name.clone(),
                dimensions: s.dimensions,
                max_tokens: s.max_tokens,
                language: s.language.clone(),
                model_revision: s.model_revision.clone(),
            },
            ModelSpec::Audio(s) => ModelDescription::Audio {
                model_name: s.model_name.clone(),
                model_family: s.model_family.clone(),
                multilingual: s.multilingual,
                model_revision: s.model_revision.clone(),
            },
            ModelSpec::Image(s) => ModelDescription::Image {
                model_name: s.model_name.clone(),
                model_family: s.model_family.clone(),
                controlnet: s.controlnet.clone(),
                model_revision: s.model_revision.clone(),
            },
        }
    }
}

/// Cache location and status for one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersionInfo {
    pub model_version: String,
    pub model_file_location: String,
    pub cache_status: CacheStatus,
}
