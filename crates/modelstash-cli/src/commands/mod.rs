//! CLI commands implementation

use anyhow::{anyhow, bail, Context as _, Result};
use modelstash_core::{
    CacheStatus, LlmSpec, ModelFormat, ModelHub, ModelSize, ModelSpec, StashConfig,
};
use modelstash_store::{is_valid_model_uri, CacheIndex, ModelCache, ModelRegistry};
use std::path::Path;
use std::sync::Arc;

/// Cache plus the registered models it resolves names against
pub struct Context {
    cache: ModelCache,
    registry: ModelRegistry,
    preferred_hub: ModelHub,
}

impl Context {
    pub async fn new(config: &StashConfig) -> Result<Self> {
        let index = Arc::new(CacheIndex::new());
        let registry = ModelRegistry::new(&config.storage.registry_root, index.clone());
        registry
            .load_dir(&config.storage.registry_root)
            .await
            .context("loading user-defined models")?;

        let cache = ModelCache::from_config(config, index).await?;
        Ok(Self {
            cache,
            registry,
            preferred_hub: config.preferred_hub(),
        })
    }

    /// Registered LLM variant for the given constraints, preferring the
    /// configured hub
    async fn resolve_llm(
        &self,
        name: &str,
        format: Option<ModelFormat>,
        size: Option<&str>,
        quantization: Option<&str>,
    ) -> Result<LlmSpec> {
        let size = size.map(ModelSize::from);
        self.registry
            .match_llm(name, format, size.as_ref(), quantization, self.preferred_hub)
            .await
            .ok_or_else(|| anyhow!("No registered LLM matches '{}'", name))
    }
}

fn load_spec(path: &Path) -> Result<ModelSpec> {
    let content =
        std::fs::read(path).with_context(|| format!("reading spec {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("parsing spec {}", path.display()))
}

/// Download a model into the cache
pub async fn cache(ctx: &Context, spec_path: &Path, quantization: Option<String>) -> Result<()> {
    let mut spec = load_spec(spec_path)?;
    if let Some(q) = quantization {
        spec = match spec {
            ModelSpec::Llm(llm) => ModelSpec::Llm(llm.with_quantization(q)),
            _ => bail!("--quantization only applies to LLM specs"),
        };
    }

    let path = ctx.cache.ensure_cached(&spec).await?;
    println!("{}", path.display());
    Ok(())
}

/// Download a registered LLM by name
pub async fn pull(
    ctx: &Context,
    name: &str,
    format: Option<ModelFormat>,
    size: Option<&str>,
    quantization: Option<&str>,
) -> Result<()> {
    let llm = ctx.resolve_llm(name, format, size, quantization).await?;
    tracing::info!(
        model_name = %llm.model_name,
        model_hub = %llm.variant.source.model_hub(),
        model_format = %llm.variant.model_format,
        "Resolved model"
    );
    let path = ctx.cache.ensure_cached(&ModelSpec::Llm(llm)).await?;
    println!("{}", path.display());
    Ok(())
}

/// Show cache status
pub fn status(ctx: &Context, spec_path: &Path, json: bool) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let versions = ctx.cache.version_info(&spec);

    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    println!("{:<48} {:<10} LOCATION", "VERSION", "CACHED");
    for version in versions {
        let cached = match &version.cache_status {
            CacheStatus::Single(cached) => cached.to_string(),
            CacheStatus::PerQuantization(flags) => format!(
                "{}/{}",
                flags.iter().filter(|f| **f).count(),
                flags.len()
            ),
        };
        println!(
            "{:<48} {:<10} {}",
            version.model_version, cached, version.model_file_location
        );
    }
    Ok(())
}

/// Print a model description
pub fn describe(spec_path: &Path) -> Result<()> {
    let spec = load_spec(spec_path)?;
    let description = modelstash_core::ModelDescription::from(&spec);
    println!("{}", serde_json::to_string_pretty(&description)?);
    Ok(())
}

/// Remove a model from the cache
pub async fn remove(ctx: &Context, spec_path: &Path) -> Result<()> {
    let spec = load_spec(spec_path)?;
    if ctx.cache.remove(&spec).await? {
        println!("Removed '{}' from the cache", spec.model_name());
    } else {
        println!("'{}' is not cached", spec.model_name());
    }
    Ok(())
}

/// Show how a URI is interpreted
pub fn parse_uri(uri: &str) -> Result<()> {
    let (scheme, path) = modelstash_store::parse_uri(uri);
    println!("Scheme: {}", scheme);
    println!("Path:   {}", path);
    match is_valid_model_uri(Some(uri)) {
        Ok(valid) => println!("Valid:  {}", valid),
        Err(e) => println!("Valid:  false ({})", e),
    }
    Ok(())
}
