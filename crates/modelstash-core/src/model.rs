//! Model identity types: hub, format, size and source

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{StashError, StashResult};

/// Remote repository provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelHub {
    #[default]
    HuggingFace,
    ModelScope,
}

impl ModelHub {
    pub const ALL: [ModelHub; 2] = [ModelHub::HuggingFace, ModelHub::ModelScope];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelHub::HuggingFace => "huggingface",
            ModelHub::ModelScope => "modelscope",
        }
    }
}

impl fmt::Display for ModelHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelHub {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "huggingface" => Ok(ModelHub::HuggingFace),
            "modelscope" => Ok(ModelHub::ModelScope),
            other => Err(StashError::InvalidSpec(format!("unknown model hub: {other}"))),
        }
    }
}

/// On-disk model format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    Pytorch,
    #[serde(alias = "ggml")]
    Ggmlv3,
    #[serde(alias = "gguf")]
    Ggufv2,
    Gptq,
    Awq,
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Pytorch => "pytorch",
            ModelFormat::Ggmlv3 => "ggmlv3",
            ModelFormat::Ggufv2 => "ggufv2",
            ModelFormat::Gptq => "gptq",
            ModelFormat::Awq => "awq",
        }
    }

    /// Quantized formats track each quantization with its own marker.
    pub fn is_quantized(&self) -> bool {
        !matches!(self, ModelFormat::Pytorch)
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pytorch" => Ok(ModelFormat::Pytorch),
            "ggmlv3" | "ggml" => Ok(ModelFormat::Ggmlv3),
            "ggufv2" | "gguf" => Ok(ModelFormat::Ggufv2),
            "gptq" => Ok(ModelFormat::Gptq),
            "awq" => Ok(ModelFormat::Awq),
            other => Err(StashError::InvalidSpec(format!("unknown model format: {other}"))),
        }
    }
}

/// Model size in billions of parameters, e.g. `7` or `"1_8"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSize {
    Integer(u64),
    Text(String),
}

impl ModelSize {
    /// Integral floats become integers, anything else keeps its decimal text.
    pub fn from_float(size: f64) -> Self {
        if size.fract() == 0.0 && size >= 0.0 {
            ModelSize::Integer(size as u64)
        } else {
            ModelSize::Text(size.to_string())
        }
    }

    /// Size comparison where `_` and `.` are interchangeable and integral
    /// strings compare numerically (`"001"` matches `1`).
    pub fn matches(&self, other: &ModelSize) -> bool {
        let lhs = self.normalized();
        let rhs = other.normalized();
        if lhs == rhs {
            return true;
        }
        match (lhs.parse::<i64>(), rhs.parse::<i64>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn normalized(&self) -> String {
        match self {
            ModelSize::Integer(n) => n.to_string(),
            ModelSize::Text(s) => s.replace('_', "."),
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSize::Integer(n) => write!(f, "{}", n),
            ModelSize::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ModelSize {
    fn from(n: u64) -> Self {
        ModelSize::Integer(n)
    }
}

impl From<&str> for ModelSize {
    fn from(s: &str) -> Self {
        ModelSize::Text(s.to_string())
    }
}

/// Where a model's files come from.
///
/// Decided once when the spec is built: a `model_uri` always wins over
/// `model_id`/`model_hub`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SourceFields", into = "SourceFields")]
pub enum ModelSource {
    Hub { model_id: String, model_hub: ModelHub },
    Uri { model_uri: String },
}

impl ModelSource {
    pub fn hub(model_id: impl Into<String>, model_hub: ModelHub) -> Self {
        ModelSource::Hub {
            model_id: model_id.into(),
            model_hub,
        }
    }

    pub fn uri(model_uri: impl Into<String>) -> Self {
        ModelSource::Uri {
            model_uri: model_uri.into(),
        }
    }

    /// Hub the files come from; URI sources report the default hub.
    pub fn model_hub(&self) -> ModelHub {
        match self {
            ModelSource::Hub { model_hub, .. } => *model_hub,
            ModelSource::Uri { .. } => ModelHub::default(),
        }
    }

    pub fn model_uri(&self) -> Option<&str> {
        match self {
            ModelSource::Uri { model_uri } => Some(model_uri),
            ModelSource::Hub { .. } => None,
        }
    }

    pub fn is_uri(&self) -> bool {
        matches!(self, ModelSource::Uri { .. })
    }

    /// Fill a `{quantization}` placeholder in the repository id.
    pub fn format_model_id(&mut self, quantization: &str) {
        if let ModelSource::Hub { model_id, .. } = self {
            if model_id.contains("{quantization}") {
                *model_id = model_id.replace("{quantization}", quantization);
            }
        }
    }
}

/// Flat wire representation of [`ModelSource`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub model_hub: ModelHub,
    #[serde(default)]
    pub model_uri: Option<String>,
}

impl TryFrom<SourceFields> for ModelSource {
    type Error = StashError;

    fn try_from(fields: SourceFields) -> Result<Self, Self::Error> {
        match (fields.model_uri, fields.model_id) {
            (Some(model_uri), _) if !model_uri.is_empty() => Ok(ModelSource::Uri { model_uri }),
            (_, Some(model_id)) => Ok(ModelSource::Hub {
                model_id,
                model_hub: fields.model_hub,
            }),
            _ => Err(StashError::InvalidSpec(
                "either `model_id` or `model_uri` must be set".to_string(),
            )),
        }
    }
}

impl From<ModelSource> for SourceFields {
    fn from(source: ModelSource) -> Self {
        match source {
            ModelSource::Hub {
                model_id,
                model_hub,
            } => SourceFields {
                model_id: Some(model_id),
                model_hub,
                model_uri: None,
            },
            ModelSource::Uri { model_uri } => SourceFields {
                model_id: None,
                model_hub: ModelHub::default(),
                model_uri: Some(model_uri),
            },
        }
    }
}

/// Model names key the cache directory, so they must be path- and URL-safe.
pub fn is_valid_model_name(model_name: &str) -> bool {
    !model_name.is_empty()
        && model_name != "."
        && model_name != ".."
        && !model_name
            .chars()
            .any(|c| c.is_whitespace() || "+/\\?%#&=".contains(c))
}

/// Reject names that cannot key a cache directory
pub fn validate_model_name(model_name: &str) -> StashResult<()> {
    if is_valid_model_name(model_name) {
        Ok(())
    } else {
        Err(StashError::InvalidModelName(model_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_matching() {
        let s = |v: &str| ModelSize::from(v);
        let n = |v: u64| ModelSize::from(v);

        assert!(s("1").matches(&s("1")));
        assert!(s("1").matches(&n(1)));
        assert!(n(1).matches(&n(1)));
        assert!(!s("1").matches(&s("b")));
        assert!(!s("1").matches(&s("1b")));
        assert!(s("1.8").matches(&s("1_8")));
        assert!(s("1_8").matches(&s("1.8")));
        assert!(!s("1").matches(&s("1_8")));
        assert!(!s("1__8").matches(&s("1_8")));
        assert!(!s("1_8").matches(&n(18)));
        assert!(!s("1_8").matches(&s("18")));
        assert!(!s("1.8").matches(&n(18)));
        assert!(!s("1.8").matches(&n(1)));
        assert!(s("001").matches(&n(1)));
    }

    #[test]
    fn test_model_size_from_float() {
        assert_eq!(ModelSize::from_float(7.0), ModelSize::Integer(7));
        assert_eq!(ModelSize::from_float(1.8), ModelSize::Text("1.8".to_string()));
    }

    #[test]
    fn test_model_size_untagged_serde() {
        let sizes: Vec<ModelSize> = serde_json::from_str(r#"[7, "1_8"]"#).unwrap();
        assert_eq!(sizes, vec![ModelSize::Integer(7), ModelSize::Text("1_8".into())]);
    }

    #[test]
    fn test_model_hub_parse_and_display() {
        assert_eq!("ModelScope".parse::<ModelHub>().unwrap(), ModelHub::ModelScope);
        assert_eq!(ModelHub::default().to_string(), "huggingface");
        assert!("github".parse::<ModelHub>().is_err());
    }

    #[test]
    fn test_model_format_aliases() {
        let f: ModelFormat = serde_json::from_str(r#""gguf""#).unwrap();
        assert_eq!(f, ModelFormat::Ggufv2);
        assert!(f.is_quantized());
        assert!(!ModelFormat::Pytorch.is_quantized());
    }

    #[test]
    fn test_source_uri_takes_precedence() {
        let source: ModelSource = serde_json::from_str(
            r#"{"model_id": "example/TestModel", "model_uri": "s3://bucket/dir"}"#,
        )
        .unwrap();
        assert_eq!(source, ModelSource::uri("s3://bucket/dir"));
    }

    #[test]
    fn test_source_hub_default() {
        let source: ModelSource =
            serde_json::from_str(r#"{"model_id": "BAAI/bge-small-en"}"#).unwrap();
        assert_eq!(
            source,
            ModelSource::hub("BAAI/bge-small-en", ModelHub::HuggingFace)
        );
    }

    #[test]
    fn test_source_requires_id_or_uri() {
        let result: Result<ModelSource, _> = serde_json::from_str(r#"{"model_hub": "modelscope"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_model_id() {
        let mut source = ModelSource::hub("TheBloke/Model-{quantization}", ModelHub::HuggingFace);
        source.format_model_id("Q4_0");
        assert_eq!(source, ModelSource::hub("TheBloke/Model-Q4_0", ModelHub::HuggingFace));
    }

    #[test]
    fn test_valid_model_name() {
        assert!(is_valid_model_name("qwen1.5-chat"));
        assert!(is_valid_model_name("custom_model"));
        assert!(!is_valid_model_name(""));
        assert!(!is_valid_model_name("org/model"));
        assert!(!is_valid_model_name("my model"));
        assert!(!is_valid_model_name("a+b"));
        assert!(!is_valid_model_name("a#b"));
        assert!(validate_model_name("a=b").is_err());
    }

    #[test]
    fn test_model_name_cannot_leave_cache_root() {
        assert!(!is_valid_model_name("."));
        assert!(!is_valid_model_name(".."));
        assert!(!is_valid_model_name("..\\models"));
        assert!(is_valid_model_name("..qwen"));
        assert!(is_valid_model_name("qwen.."));
    }
}
