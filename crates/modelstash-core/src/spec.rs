//! Model specifications for every cacheable model type

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DownloadContext;
use crate::model::{ModelFormat, ModelHub, ModelSize, ModelSource};
use crate::{StashError, StashResult};

/// One downloadable variant of an LLM family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmVariant {
    pub model_format: ModelFormat,
    pub model_size_in_billions: ModelSize,
    #[serde(default)]
    pub quantizations: Vec<String>,
    #[serde(flatten)]
    pub source: ModelSource,
    #[serde(default)]
    pub model_revision: Option<String>,
    /// File name for quantized formats, e.g. `Model.{quantization}.gguf`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file_name_template: Option<String>,
    /// Split file name, e.g. `Model.{quantization}.gguf.{part}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_file_name_split_template: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub quantization_parts: HashMap<String, Vec<String>>,
}

impl LlmVariant {
    /// Files to fetch for `quantization`, or `None` for a whole snapshot.
    pub fn files_for(&self, quantization: &str) -> Option<Vec<String>> {
        if !self.model_format.is_quantized() {
            return None;
        }
        if let (Some(parts), Some(split)) = (
            self.quantization_parts.get(quantization),
            self.model_file_name_split_template.as_ref(),
        ) {
            return Some(
                parts
                    .iter()
                    .map(|part| {
                        split
                            .replace("{quantization}", quantization)
                            .replace("{part}", part)
                    })
                    .collect(),
            );
        }
        self.model_file_name_template
            .as_ref()
            .map(|template| vec![template.replace("{quantization}", quantization)])
    }
}

/// A named LLM with all of its variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmFamily {
    #[serde(default = "default_version")]
    pub version: u32,
    pub model_name: String,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default)]
    pub model_lang: Vec<String>,
    #[serde(default)]
    pub model_ability: Vec<String>,
    #[serde(default)]
    pub model_description: Option<String>,
    #[serde(default)]
    pub model_family: Option<String>,
    pub model_specs: Vec<LlmVariant>,
}

fn default_version() -> u32 {
    1
}

fn default_context_length() -> u32 {
    2048
}

impl LlmFamily {
    /// Pin one variant (and optionally a quantization) into a concrete spec
    pub fn to_spec(&self, variant: LlmVariant, quantization: Option<String>) -> LlmSpec {
        LlmSpec {
            model_name: self.model_name.clone(),
            context_length: self.context_length,
            model_lang: self.model_lang.clone(),
            model_ability: self.model_ability.clone(),
            model_description: self.model_description.clone(),
            model_family: self.model_family.clone(),
            variant,
            quantization,
        }
    }
}

/// A resolved LLM: family metadata plus exactly one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSpec {
    pub model_name: String,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default)]
    pub model_lang: Vec<String>,
    #[serde(default)]
    pub model_ability: Vec<String>,
    #[serde(default)]
    pub model_description: Option<String>,
    #[serde(default)]
    pub model_family: Option<String>,
    #[serde(flatten)]
    pub variant: LlmVariant,
    /// Selected quantization for quantized formats
    #[serde(default)]
    pub quantization: Option<String>,
}

impl LlmSpec {
    pub fn with_quantization(mut self, quantization: impl Into<String>) -> Self {
        self.quantization = Some(quantization.into());
        self
    }

    /// The selected quantization, required for quantized formats
    pub fn require_quantization(&self) -> StashResult<&str> {
        self.quantization.as_deref().ok_or_else(|| {
            StashError::InvalidSpec(format!(
                "model '{}' has format {} and needs a quantization",
                self.model_name, self.variant.model_format
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSpec {
    pub model_name: String,
    pub dimensions: u32,
    pub max_tokens: u32,
    #[serde(default)]
    pub language: Vec<String>,
    #[serde(flatten)]
    pub source: ModelSource,
    #[serde(default)]
    pub model_revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub model_name: String,
    pub model_family: String,
    #[serde(flatten)]
    pub source: ModelSource,
    #[serde(default)]
    pub model_revision: Option<String>,
    #[serde(default)]
    pub multilingual: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub model_name: String,
    pub model_family: String,
    #[serde(flatten)]
    pub source: ModelSource,
    #[serde(default)]
    pub model_revision: Option<String>,
    #[serde(default)]
    pub controlnet: Vec<String>,
}

/// Any cacheable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type")]
pub enum ModelSpec {
    #[serde(rename = "LLM")]
    Llm(LlmSpec),
    #[serde(rename = "embedding")]
    Embedding(EmbeddingSpec),
    #[serde(rename = "audio")]
    Audio(AudioSpec),
    #[serde(rename = "image")]
    Image(ImageSpec),
}

impl ModelSpec {
    pub fn model_name(&self) -> &str {
        match self {
            ModelSpec::Llm(s) => &s.model_name,
            ModelSpec::Embedding(s) => &s.model_name,
            ModelSpec::Audio(s) => &s.model_name,
            ModelSpec::Image(s) => &s.model_name,
        }
    }

    pub fn source(&self) -> &ModelSource {
        match self {
            ModelSpec::Llm(s) => &s.variant.source,
            ModelSpec::Embedding(s) => &s.source,
            ModelSpec::Audio(s) => &s.source,
            ModelSpec::Image(s) => &s.source,
        }
    }

    pub fn model_revision(&self) -> Option<&str> {
        match self {
            ModelSpec::Llm(s) => s.variant.model_revision.as_deref(),
            ModelSpec::Embedding(s) => s.model_revision.as_deref(),
            ModelSpec::Audio(s) => s.model_revision.as_deref(),
            ModelSpec::Image(s) => s.model_revision.as_deref(),
        }
    }

    pub fn model_hub(&self) -> ModelHub {
        self.source().model_hub()
    }

    pub fn as_llm(&self) -> Option<&LlmSpec> {
        match self {
            ModelSpec::Llm(s) => Some(s),
            _ => None,
        }
    }

    pub fn model_format(&self) -> Option<ModelFormat> {
        self.as_llm().map(|s| s.variant.model_format)
    }

    pub fn model_size(&self) -> Option<&ModelSize> {
        self.as_llm().map(|s| &s.variant.model_size_in_billions)
    }

    pub fn quantization(&self) -> Option<&str> {
        self.as_llm().and_then(|s| s.quantization.as_deref())
    }

    pub fn quantizations(&self) -> &[String] {
        match self {
            ModelSpec::Llm(s) => &s.variant.quantizations,
            _ => &[],
        }
    }

    pub fn model_type(&self) -> &'static str {
        match self {
            ModelSpec::Llm(_) => "LLM",
            ModelSpec::Embedding(_) => "embedding",
            ModelSpec::Audio(_) => "audio",
            ModelSpec::Image(_) => "image",
        }
    }

    /// Version label shown next to the cache status
    pub fn model_version(&self) -> String {
        match self {
            ModelSpec::Llm(s) => format!(
                "{}--{}B--{}--{}",
                s.model_name,
                s.variant.model_size_in_billions,
                s.variant.model_format,
                s.quantization.as_deref().unwrap_or("none")
            ),
            ModelSpec::Embedding(s) => {
                format!("{}--{}--{}", s.model_name, s.max_tokens, s.dimensions)
            }
            ModelSpec::Audio(s) => s.model_name.clone(),
            ModelSpec::Image(s) => s.model_name.clone(),
        }
    }

    /// Size/format context reported when downloads are exhausted
    pub fn download_context(&self) -> DownloadContext {
        match self {
            ModelSpec::Llm(s) => DownloadContext {
                model_size: Some(s.variant.model_size_in_billions.to_string()),
                model_format: Some(s.variant.model_format.to_string()),
            },
            _ => DownloadContext::default(),
        }
    }
}
