//! Configuration types for modelstash

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::ModelHub;

/// Environment variable selecting the preferred hub (`modelscope`)
pub const ENV_MODEL_SRC: &str = "MODELSTASH_MODEL_SRC";
/// Environment variable for the modelstash home directory
pub const ENV_HOME: &str = "MODELSTASH_HOME";
/// Environment variable overriding the cache root directly
pub const ENV_CACHE_DIR: &str = "MODELSTASH_CACHE_DIR";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Storage layout
    pub storage: StorageConfig,
    /// Hub clients
    pub hub: HubConfig,
    /// Download behaviour
    pub download: DownloadConfig,
    /// Object storage clients
    pub object_store: ObjectStoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl StashConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, crate::StashError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::StashError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::StashError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Overlay settings taken from the process environment
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(home) = non_empty(ENV_HOME) {
            let home = PathBuf::from(home);
            self.storage.cache_root = home.join("cache");
            self.storage.hub_cache_root = home.join("hub");
            self.storage.registry_root = home.join("model");
        }
        if let Some(cache_dir) = non_empty(ENV_CACHE_DIR) {
            self.storage.cache_root = PathBuf::from(cache_dir);
        }

        let locale = non_empty("LC_ALL").or_else(|| non_empty("LANG"));
        if non_empty(ENV_MODEL_SRC).is_some_and(|src| src.eq_ignore_ascii_case("modelscope"))
            || locale.is_some_and(|l| l.starts_with("zh_CN"))
        {
            self.hub.preferred_hub = Some(ModelHub::ModelScope);
        }

        if let Some(token) = non_empty("HF_TOKEN").or_else(|| non_empty("HUGGING_FACE_HUB_TOKEN")) {
            self.hub.token = Some(token);
        }
        if let Some(endpoint) = non_empty("HF_ENDPOINT") {
            self.hub.huggingface_endpoint = endpoint;
        }
    }

    /// Hub that should be tried first when a model is offered by several
    pub fn preferred_hub(&self) -> ModelHub {
        self.hub.preferred_hub.unwrap_or_default()
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".modelstash"))
        .unwrap_or_else(|| PathBuf::from("/tmp/modelstash"))
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the model cache: one entry per model name
    pub cache_root: PathBuf,
    /// Where hub clients keep their own content-addressed downloads
    pub hub_cache_root: PathBuf,
    /// Where user-defined model definitions are persisted
    pub registry_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = default_home();
        Self {
            cache_root: home.join("cache"),
            hub_cache_root: home.join("hub"),
            registry_root: home.join("model"),
        }
    }
}

/// Hub client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Hub to prefer when matching models offered by several hubs
    pub preferred_hub: Option<ModelHub>,
    /// HuggingFace endpoint
    pub huggingface_endpoint: String,
    /// ModelScope endpoint
    pub modelscope_endpoint: String,
    /// Access token for gated repositories
    pub token: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            preferred_hub: None,
            huggingface_endpoint: "https://huggingface.co".to_string(),
            modelscope_endpoint: "https://www.modelscope.cn".to_string(),
            token: None,
        }
    }
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Attempts per model download
    pub max_attempts: u32,
    /// Attempts per file in an object-storage batch
    pub per_file_attempts: u32,
    /// Upper bound on concurrent object-storage transfers
    pub max_parallel_transfers: usize,
    /// Streaming chunk size in bytes
    pub chunk_size: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_file_attempts: 3,
            max_parallel_transfers: 4,
            chunk_size: 1024 * 1024, // 1 MiB
        }
    }
}

/// Object storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    /// Use unsigned requests (self-hosted storage)
    pub anonymous: bool,
    /// Custom S3-compatible endpoint
    pub endpoint_url: Option<String>,
    /// Region override
    pub region: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> StashConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = StashConfig::default();
        config.apply_vars(|key| vars.get(key).cloned());
        config
    }

    #[test]
    fn test_default_config() {
        let config = StashConfig::default();
        assert_eq!(config.download.max_attempts, 3);
        assert_eq!(config.download.max_parallel_transfers, 4);
        assert_eq!(config.download.chunk_size, 1024 * 1024);
        assert_eq!(config.preferred_hub(), ModelHub::HuggingFace);
        assert!(config.storage.cache_root.ends_with("cache"));
    }

    #[test]
    fn test_config_parse() {
        let toml_str = r#"
[storage]
cache_root = "/data/models"

[hub]
preferred_hub = "modelscope"

[download]
max_attempts = 5
"#;
        let config: StashConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.cache_root, PathBuf::from("/data/models"));
        assert_eq!(config.preferred_hub(), ModelHub::ModelScope);
        assert_eq!(config.download.max_attempts, 5);
        assert_eq!(config.download.per_file_attempts, 3);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelstash.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = StashConfig::from_file(&path).unwrap();
        assert_eq!(config.logging.level, "debug");

        assert!(StashConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_model_src() {
        let config = apply(&[(ENV_MODEL_SRC, "modelscope")]);
        assert_eq!(config.preferred_hub(), ModelHub::ModelScope);

        let config = apply(&[("LANG", "zh_CN.UTF-8")]);
        assert_eq!(config.preferred_hub(), ModelHub::ModelScope);

        let config = apply(&[("LANG", "en_US.UTF-8")]);
        assert_eq!(config.preferred_hub(), ModelHub::HuggingFace);
    }

    #[test]
    fn test_env_home_and_cache_dir() {
        let config = apply(&[(ENV_HOME, "/srv/stash")]);
        assert_eq!(config.storage.cache_root, PathBuf::from("/srv/stash/cache"));
        assert_eq!(config.storage.hub_cache_root, PathBuf::from("/srv/stash/hub"));

        let config = apply(&[(ENV_HOME, "/srv/stash"), (ENV_CACHE_DIR, "/fast/cache")]);
        assert_eq!(config.storage.cache_root, PathBuf::from("/fast/cache"));
    }

    #[test]
    fn test_env_token() {
        let config = apply(&[("HUGGING_FACE_HUB_TOKEN", "hf_abc")]);
        assert_eq!(config.hub.token.as_deref(), Some("hf_abc"));
    }
}
