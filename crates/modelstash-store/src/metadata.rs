//! The cache marker written after a successful fetch

use chrono::{DateTime, Utc};
use modelstash_core::{ModelDescription, ModelHub, ModelSpec, StashError, StashResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Content of a `__valid_download*` marker.
///
/// Only `model_revision` and `model_hub` decide validity; everything else
/// describes the cached model for humans and API listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub model_revision: Option<String>,
    #[serde(default)]
    pub model_hub: ModelHub,
    pub cached_at: DateTime<Utc>,
    #[serde(flatten)]
    pub description: Map<String, Value>,
}

impl CacheMetadata {
    pub fn for_spec(spec: &ModelSpec) -> StashResult<Self> {
        let mut description = match serde_json::to_value(ModelDescription::from(spec))? {
            Value::Object(map) => map,
            other => {
                return Err(StashError::Internal(format!(
                    "model description is not an object: {other}"
                )))
            }
        };
        description.remove("model_revision");
        description.remove("model_hub");
        description.remove("cached_at");

        Ok(Self {
            model_revision: spec.model_revision().map(str::to_string),
            model_hub: spec.model_hub(),
            cached_at: Utc::now(),
            description,
        })
    }

    /// Write the marker via a temp file in the same directory, then rename,
    /// so readers never see a half-written marker.
    pub fn write(&self, meta_path: &Path) -> StashResult<()> {
        let dir = meta_path.parent().ok_or_else(|| {
            StashError::Internal(format!("marker path has no parent: {}", meta_path.display()))
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, self)?;
        tmp.flush()?;
        tmp.persist(meta_path).map_err(|e| StashError::Io(e.error))?;
        debug!(path = %meta_path.display(), "Wrote cache marker");
        Ok(())
    }

    pub fn read(meta_path: &Path) -> StashResult<Self> {
        let content = std::fs::read(meta_path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}
