//! On-disk cache layout
//!
//! ```text
//! <cache_root>/
//! ├── bge-small-en-v1.5/            canonical entry, keyed by model name
//! │   ├── config.json -> <hub blob>
//! │   └── __valid_download          marker
//! ├── qwen-chat/                    quantized LLM entry
//! │   ├── qwen.q4_0.gguf
//! │   ├── __valid_download_q4_0
//! │   └── __valid_download_modelscope_q5_0
//! ├── local-model -> /mnt/models/x  URI entry (directory symlink)
//! └── orca-ggmlv3-3b/               legacy layout, discovery only
//! ```

use modelstash_core::{ModelFormat, ModelHub, ModelSize, ModelSpec};
use std::path::{Path, PathBuf};

/// Marker file base name
pub const MARKER_FILE: &str = "__valid_download";

/// Which marker file records a cached artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKey {
    /// Whole-repository snapshot
    Snapshot { hub: ModelHub },
    /// One quantization of a quantized format
    Quantized { hub: ModelHub, quantization: String },
}

impl MarkerKey {
    pub fn file_name(&self) -> String {
        match self {
            MarkerKey::Snapshot {
                hub: ModelHub::HuggingFace,
            } => MARKER_FILE.to_string(),
            MarkerKey::Snapshot { hub } => format!("{MARKER_FILE}_{hub}"),
            MarkerKey::Quantized {
                hub: ModelHub::HuggingFace,
                quantization,
            } => format!("{MARKER_FILE}_{quantization}"),
            MarkerKey::Quantized { hub, quantization } => {
                format!("{MARKER_FILE}_{hub}_{quantization}")
            }
        }
    }
}

/// Path of the marker for `key` inside `cache_dir`
pub fn meta_path(cache_dir: &Path, key: &MarkerKey) -> PathBuf {
    cache_dir.join(key.file_name())
}

/// Maps model identities to cache directories. Never creates anything.
#[derive(Debug, Clone)]
pub struct CacheDirectoryResolver {
    cache_root: PathBuf,
}

impl CacheDirectoryResolver {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Canonical directory for `spec`, with symlinks resolved
    pub fn resolve(&self, spec: &ModelSpec) -> PathBuf {
        realpath(&self.entry_path(spec.model_name()))
    }

    /// `<cache_root>/<model_name>` as written, last component unresolved
    pub fn entry_path(&self, model_name: &str) -> PathBuf {
        realpath(&self.cache_root).join(model_name)
    }

    /// Older `<name>-<format>-<size>b` directory, used for discovery only
    pub fn legacy_path(&self, model_name: &str, format: ModelFormat, size: &ModelSize) -> PathBuf {
        self.cache_root
            .join(format!("{model_name}-{format}-{size}b"))
    }

    /// Oldest single-file layout: `<name>-<format>-<size>b-<quant>/model.bin`
    pub fn legacy_model_file(
        &self,
        model_name: &str,
        format: ModelFormat,
        size: &ModelSize,
        quantization: &str,
    ) -> PathBuf {
        self.cache_root
            .join(format!("{model_name}-{format}-{size}b-{quantization}"))
            .join("model.bin")
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest.
fn realpath(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            realpath(parent).join(name)
        }
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstash_core::{EmbeddingSpec, ModelSource};

    fn embedding(name: &str) -> ModelSpec {
        ModelSpec::Embedding(EmbeddingSpec {
            model_name: name.to_string(),
            dimensions: 384,
            max_tokens: 512,
            language: vec!["en".to_string()],
            source: ModelSource::hub("BAAI/bge-small-en-v1.5", ModelHub::HuggingFace),
            model_revision: None,
        })
    }

    #[test]
    fn test_marker_file_names() {
        let snapshot = |hub| MarkerKey::Snapshot { hub };
        let quantized = |hub, q: &str| MarkerKey::Quantized {
            hub,
            quantization: q.to_string(),
        };
        assert_eq!(snapshot(ModelHub::HuggingFace).file_name(), "__valid_download");
        assert_eq!(
            snapshot(ModelHub::ModelScope).file_name(),
            "__valid_download_modelscope"
        );
        assert_eq!(
            quantized(ModelHub::HuggingFace, "q4_0").file_name(),
            "__valid_download_q4_0"
        );
        assert_eq!(
            quantized(ModelHub::ModelScope, "q4_0").file_name(),
            "__valid_download_modelscope_q4_0"
        );
    }

    #[test]
    fn test_resolve_is_name_keyed() {
        let root = tempfile::tempdir().unwrap();
        let resolver = CacheDirectoryResolver::new(root.path());
        let dir = resolver.resolve(&embedding("bge-small-en-v1.5"));
        assert_eq!(
            dir,
            root.path().canonicalize().unwrap().join("bge-small-en-v1.5")
        );
        assert!(!dir.exists(), "resolver must not create directories");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlinks() {
        let root = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let resolver = CacheDirectoryResolver::new(root.path());
        std::os::unix::fs::symlink(source.path(), resolver.entry_path("linked")).unwrap();

        assert_eq!(
            resolver.resolve(&embedding("linked")),
            source.path().canonicalize().unwrap()
        );
        assert!(resolver
            .entry_path("linked")
            .symlink_metadata()
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn test_resolve_missing_root() {
        let resolver = CacheDirectoryResolver::new("/nonexistent-root-12345/cache");
        assert_eq!(
            resolver.entry_path("m"),
            PathBuf::from("/nonexistent-root-12345/cache/m")
        );
    }

    #[test]
    fn test_legacy_paths() {
        let resolver = CacheDirectoryResolver::new("/cache");
        let size = ModelSize::Integer(3);
        assert_eq!(
            resolver.legacy_path("orca", ModelFormat::Ggmlv3, &size),
            PathBuf::from("/cache/orca-ggmlv3-3b")
        );
        assert_eq!(
            resolver.legacy_model_file("orca", ModelFormat::Ggmlv3, &size, "q4_0"),
            PathBuf::from("/cache/orca-ggmlv3-3b-q4_0/model.bin")
        );
        assert_eq!(
            resolver.legacy_path("qwen", ModelFormat::Pytorch, &ModelSize::from("1_8")),
            PathBuf::from("/cache/qwen-pytorch-1_8b")
        );
    }
}
