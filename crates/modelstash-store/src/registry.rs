//! Built-in and user-defined model definitions

use crate::index::CacheIndex;
use crate::uri::is_valid_model_uri;
use modelstash_core::{
    validate_model_name, LlmFamily, LlmSpec, ModelFormat, ModelHub, ModelSize, ModelSpec,
    StashError, StashResult,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory holding persisted LLM families
const LLM_DIR: &str = "llm";

/// A registered definition
#[derive(Debug, Clone, PartialEq)]
pub enum RegisteredModel {
    Llm(LlmFamily),
    Model(ModelSpec),
}

impl RegisteredModel {
    pub fn model_name(&self) -> &str {
        match self {
            RegisteredModel::Llm(family) => &family.model_name,
            RegisteredModel::Model(spec) => spec.model_name(),
        }
    }
}

/// Model registry
///
/// Built-in definitions are fixed at construction. User definitions can be
/// added and removed at runtime and are optionally persisted as JSON under
/// `root`.
pub struct ModelRegistry {
    root: PathBuf,
    index: Arc<CacheIndex>,
    builtin: Vec<RegisteredModel>,
    user: RwLock<HashMap<String, RegisteredModel>>,
}

impl ModelRegistry {
    pub fn new(root: impl Into<PathBuf>, index: Arc<CacheIndex>) -> Self {
        Self {
            root: root.into(),
            index,
            builtin: Vec::new(),
            user: RwLock::new(HashMap::new()),
        }
    }

    /// Add built-in definitions; their revisions seed the cache index.
    pub fn with_builtin(mut self, models: impl IntoIterator<Item = RegisteredModel>) -> Self {
        for model in models {
            record_revisions(&self.index, &model);
            self.builtin.push(model);
        }
        self
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.index
    }

    fn is_builtin(&self, model_name: &str) -> bool {
        self.builtin.iter().any(|m| m.model_name() == model_name)
    }

    /// Register a user-defined LLM family
    pub async fn register_llm(&self, family: LlmFamily, persist: bool) -> StashResult<()> {
        if family.model_specs.is_empty() {
            return Err(StashError::InvalidSpec(format!(
                "model '{}' has no model_specs",
                family.model_name
            )));
        }
        for variant in &family.model_specs {
            check_uri(variant.source.model_uri())?;
        }
        self.insert(RegisteredModel::Llm(family), persist).await
    }

    /// Register a user-defined embedding, audio or image model
    pub async fn register(&self, spec: ModelSpec, persist: bool) -> StashResult<()> {
        if let ModelSpec::Llm(llm) = &spec {
            return Err(StashError::InvalidSpec(format!(
                "'{}' is an LLM, register it as a family",
                llm.model_name
            )));
        }
        check_uri(spec.source().model_uri())?;
        self.insert(RegisteredModel::Model(spec), persist).await
    }

    async fn insert(&self, model: RegisteredModel, persist: bool) -> StashResult<()> {
        let model_name = model.model_name().to_string();
        validate_model_name(&model_name)?;
        if self.is_builtin(&model_name) {
            return Err(StashError::AlreadyRegistered(format!(
                "{} conflicts with a built-in model",
                model_name
            )));
        }

        let mut user = self.user.write().await;
        if user.contains_key(&model_name) {
            return Err(StashError::AlreadyRegistered(model_name));
        }

        if persist {
            let path = self.persisted_path(&model);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = match &model {
                RegisteredModel::Llm(family) => serde_json::to_vec_pretty(family)?,
                RegisteredModel::Model(spec) => serde_json::to_vec_pretty(spec)?,
            };
            tokio::fs::write(&path, json).await?;
            debug!(model_name = %model_name, path = %path.display(), "Persisted model definition");
        }

        record_revisions(&self.index, &model);
        user.insert(model_name.clone(), model);
        info!(model_name = %model_name, persist, "Registered model");
        Ok(())
    }

    /// Remove a user-defined model, its persisted JSON and its index entry
    pub async fn unregister(&self, model_name: &str) -> StashResult<RegisteredModel> {
        if self.is_builtin(model_name) {
            return Err(StashError::InvalidSpec(format!(
                "built-in model {} cannot be unregistered",
                model_name
            )));
        }

        let model = self
            .user
            .write()
            .await
            .remove(model_name)
            .ok_or_else(|| StashError::ModelNotFound(model_name.to_string()))?;

        let path = self.persisted_path(&model);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Removed persisted model definition"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.index.forget(model_name);
        info!(model_name, "Unregistered model");
        Ok(model)
    }

    /// Load persisted definitions from `dir`; unreadable files are skipped.
    pub async fn load_dir(&self, dir: &Path) -> StashResult<usize> {
        if !tokio::fs::try_exists(dir).await? {
            return Ok(0);
        }

        let files: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();

        let mut loaded = 0;
        for path in files {
            match self.load_file(&path).await {
                Ok(()) => loaded += 1,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping model definition")
                }
            }
        }
        info!(dir = %dir.display(), loaded, "Loaded user-defined models");
        Ok(loaded)
    }

    async fn load_file(&self, path: &Path) -> StashResult<()> {
        let content = tokio::fs::read(path).await?;
        let value: Value = serde_json::from_slice(&content)?;
        if value.get("model_specs").is_some() {
            self.register_llm(serde_json::from_value(value)?, false).await
        } else {
            self.register(serde_json::from_value(value)?, false).await
        }
    }

    pub async fn get(&self, model_name: &str) -> Option<RegisteredModel> {
        if let Some(model) = self.builtin.iter().find(|m| m.model_name() == model_name) {
            return Some(model.clone());
        }
        self.user.read().await.get(model_name).cloned()
    }

    /// Names of every registered model, built-ins first
    pub async fn list(&self) -> Vec<String> {
        let mut user: Vec<String> = self.user.read().await.keys().cloned().collect();
        user.sort();
        self.builtin
            .iter()
            .map(|m| m.model_name().to_string())
            .chain(user)
            .collect()
    }

    /// Pick the first LLM variant matching the given constraints.
    ///
    /// Quantizations compare case-insensitively and the declared spelling is
    /// returned. Without a requested quantization, `pytorch` selects `none`
    /// and other formats their first declared quantization. Variants from
    /// `preferred_hub` are tried first.
    pub async fn match_llm(
        &self,
        model_name: &str,
        model_format: Option<ModelFormat>,
        model_size: Option<&ModelSize>,
        quantization: Option<&str>,
        preferred_hub: ModelHub,
    ) -> Option<LlmSpec> {
        let user = self.user.read().await;
        let families = self
            .builtin
            .iter()
            .chain(user.values())
            .filter_map(|m| match m {
                RegisteredModel::Llm(family) if family.model_name == model_name => Some(family),
                _ => None,
            });

        for family in families {
            let mut variants: Vec<_> = family.model_specs.iter().collect();
            variants.sort_by_key(|v| v.source.model_hub() != preferred_hub);

            for variant in variants {
                if model_format.is_some_and(|f| f != variant.model_format) {
                    continue;
                }
                if model_size.is_some_and(|s| !s.matches(&variant.model_size_in_billions)) {
                    continue;
                }
                let selected = match quantization {
                    Some(q) => match variant
                        .quantizations
                        .iter()
                        .find(|declared| declared.eq_ignore_ascii_case(q))
                    {
                        Some(declared) => Some(declared.clone()),
                        None => continue,
                    },
                    None if variant.model_format == ModelFormat::Pytorch => {
                        Some("none".to_string())
                    }
                    None => variant.quantizations.first().cloned(),
                };

                let mut variant = variant.clone();
                if let Some(q) = &selected {
                    variant.source.format_model_id(q);
                }
                debug!(
                    model_name,
                    model_format = %variant.model_format,
                    quantization = ?selected,
                    "Matched LLM"
                );
                return Some(family.to_spec(variant, selected));
            }
        }
        None
    }

    fn persisted_path(&self, model: &RegisteredModel) -> PathBuf {
        let kind = match model {
            RegisteredModel::Llm(_) => LLM_DIR,
            RegisteredModel::Model(spec) => spec.model_type(),
        };
        self.root
            .join(kind)
            .join(format!("{}.json", model.model_name()))
    }
}

fn check_uri(model_uri: Option<&str>) -> StashResult<()> {
    match model_uri {
        Some(uri) if !is_valid_model_uri(Some(uri))? => {
            Err(StashError::InvalidUri(format!("Invalid model URI {}", uri)))
        }
        _ => Ok(()),
    }
}

fn record_revisions(index: &CacheIndex, model: &RegisteredModel) {
    match model {
        RegisteredModel::Llm(family) => {
            for variant in &family.model_specs {
                index.record(&family.model_name, variant.model_revision.as_deref());
            }
        }
        RegisteredModel::Model(spec) => index.record(spec.model_name(), spec.model_revision()),
    }
}
