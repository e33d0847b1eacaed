//! Local model cache

use crate::fetch::object::store_for_scheme;
use crate::fetch::{
    local::strip_trailing_slash, ArtifactFetcher, HuggingFaceRepository, ModelScopeRepository,
    ObjectStore, RemoteRepository, SnapshotRequest, TransferOptions,
};
use crate::index::CacheIndex;
use crate::layout::{meta_path, CacheDirectoryResolver, MarkerKey};
use crate::metadata::CacheMetadata;
use crate::retry::{DownloadTarget, RetryingDownloadDriver};
use crate::revision::{any_valid, is_valid};
use crate::uri::parse_uri;
use modelstash_core::{
    validate_model_name, CacheStatus, LlmSpec, ModelDescription, ModelHub, ModelSource, ModelSpec,
    ModelVersionInfo, StashConfig, StashError, StashResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Object storage schemes that may be compiled in
const OBJECT_SCHEMES: &[&str] = &["s3"];

/// Model cache manager
///
/// Makes a model's files available under `<cache_root>/<model_name>`,
/// fetching them from a hub, a local directory or object storage.
pub struct ModelCache {
    resolver: CacheDirectoryResolver,
    index: Arc<CacheIndex>,
    hubs: HashMap<ModelHub, Arc<dyn RemoteRepository>>,
    object_stores: HashMap<String, Arc<dyn ObjectStore>>,
    driver: RetryingDownloadDriver,
    transfer: TransferOptions,
}

impl ModelCache {
    /// Create a cache with no backends registered
    pub fn new(cache_root: impl Into<PathBuf>, index: Arc<CacheIndex>) -> Self {
        Self {
            resolver: CacheDirectoryResolver::new(cache_root),
            index,
            hubs: HashMap::new(),
            object_stores: HashMap::new(),
            driver: RetryingDownloadDriver::default(),
            transfer: TransferOptions::default(),
        }
    }

    /// Create a cache with every backend the configuration allows
    pub async fn from_config(config: &StashConfig, index: Arc<CacheIndex>) -> StashResult<Self> {
        let mut cache = Self::new(&config.storage.cache_root, index)
            .with_retry(RetryingDownloadDriver::new(config.download.max_attempts))
            .with_transfer_options(TransferOptions::from(&config.download))
            .with_hub(Arc::new(HuggingFaceRepository::from_config(config)?))
            .with_hub(Arc::new(ModelScopeRepository::from_config(config)?));

        for scheme in OBJECT_SCHEMES {
            if let Some(store) = store_for_scheme(scheme, &config.object_store).await {
                cache = cache.with_object_store(*scheme, store);
            }
        }

        info!(
            cache_root = %config.storage.cache_root.display(),
            hubs = cache.hubs.len(),
            object_stores = cache.object_stores.len(),
            "Initialized model cache"
        );
        Ok(cache)
    }

    pub fn with_hub(mut self, repository: Arc<dyn RemoteRepository>) -> Self {
        self.hubs.insert(repository.hub(), repository);
        self
    }

    pub fn with_object_store(
        mut self,
        scheme: impl Into<String>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        self.object_stores.insert(scheme.into(), store);
        self
    }

    pub fn with_retry(mut self, driver: RetryingDownloadDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn with_transfer_options(mut self, options: TransferOptions) -> Self {
        self.transfer = options;
        self
    }

    pub fn resolver(&self) -> &CacheDirectoryResolver {
        &self.resolver
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.index
    }

    /// Make `spec`'s files available locally and return their directory.
    ///
    /// A warm cache returns without any network I/O.
    pub async fn ensure_cached(&self, spec: &ModelSpec) -> StashResult<PathBuf> {
        validate_model_name(spec.model_name())?;

        if let ModelSpec::Llm(llm) = spec {
            if let Some(dir) = self.legacy_dir(llm, llm.quantization.as_deref()) {
                info!(model_name = %llm.model_name, path = %dir.display(), "Using legacy cache");
                return Ok(dir);
            }
        }

        match spec.source() {
            ModelSource::Uri { model_uri } => self.cache_from_uri(spec, model_uri).await,
            ModelSource::Hub {
                model_id,
                model_hub,
            } => self.cache_from_hub(spec, model_id, *model_hub).await,
        }
    }

    async fn cache_from_uri(&self, spec: &ModelSpec, model_uri: &str) -> StashResult<PathBuf> {
        let model_name = spec.model_name();
        let entry = self.resolver.entry_path(model_name);
        if tokio::fs::try_exists(&entry).await? {
            info!(model_name, path = %entry.display(), "Model already cached");
            return Ok(entry);
        }

        let model_uri = strip_trailing_slash(model_uri);
        let (scheme, root) = parse_uri(model_uri);
        let fetcher = if scheme == "file" {
            ArtifactFetcher::Local {
                source: model_uri.to_string(),
            }
        } else {
            let store = self
                .object_stores
                .get(&scheme)
                .ok_or_else(|| StashError::UnsupportedScheme(scheme.clone()))?;
            ArtifactFetcher::Object {
                store: store.clone(),
                root,
                options: self.transfer.clone(),
            }
        };

        debug!(model_name, ?fetcher, "Caching model from URI");
        fetcher.fetch(model_name, &entry).await
    }

    async fn cache_from_hub(
        &self,
        spec: &ModelSpec,
        model_id: &str,
        hub: ModelHub,
    ) -> StashResult<PathBuf> {
        let model_name = spec.model_name();
        let marker = marker_key(spec)?;
        let request = snapshot_request(spec, model_id)?;
        let repository = self
            .hubs
            .get(&hub)
            .cloned()
            .ok_or_else(|| StashError::Config(format!("No backend registered for hub {}", hub)))?;

        let cache_dir = self.resolver.resolve(spec);
        let created = !tokio::fs::try_exists(&cache_dir).await?;
        if created {
            tokio::fs::create_dir_all(&cache_dir).await?;
            info!(model_name, path = %cache_dir.display(), "Created cache directory");
        }

        if self.skip_download(spec, &cache_dir) {
            info!(model_name, path = %cache_dir.display(), "Cache hit");
            return Ok(cache_dir);
        }

        let fetcher = ArtifactFetcher::Hub {
            repository,
            request,
        };
        let target = DownloadTarget::new(model_name, spec.download_context());
        let result = self
            .driver
            .run(&target, |attempt| {
                let fetcher = &fetcher;
                let cache_dir = &cache_dir;
                async move {
                    debug!(model_name, attempt, "Downloading model");
                    fetcher.fetch(model_name, cache_dir).await
                }
            })
            .await;

        match result {
            Ok(_) => {
                CacheMetadata::for_spec(spec)?.write(&meta_path(&cache_dir, &marker))?;
                info!(model_name, path = %cache_dir.display(), "Model cached");
                Ok(cache_dir)
            }
            Err(err) => {
                if created {
                    warn!(
                        model_name,
                        path = %cache_dir.display(),
                        "Removing cache directory after failed download"
                    );
                    if let Err(e) = tokio::fs::remove_dir_all(&cache_dir).await {
                        debug!(path = %cache_dir.display(), error = %e, "Cleanup failed");
                    }
                }
                Err(err)
            }
        }
    }

    fn skip_download(&self, spec: &ModelSpec, cache_dir: &Path) -> bool {
        match spec {
            ModelSpec::Llm(llm) => llm_hit(llm, cache_dir, llm.quantization.as_deref()),
            _ => is_valid(
                &meta_path(
                    cache_dir,
                    &MarkerKey::Snapshot {
                        hub: ModelHub::HuggingFace,
                    },
                ),
                spec.model_revision(),
                Some(spec.model_hub()),
            ),
        }
    }

    /// Older layouts that already hold this LLM
    fn legacy_dir(&self, llm: &LlmSpec, quantization: Option<&str>) -> Option<PathBuf> {
        let variant = &llm.variant;
        if let (true, Some(q)) = (variant.model_format.is_quantized(), quantization) {
            let file = self.resolver.legacy_model_file(
                &llm.model_name,
                variant.model_format,
                &variant.model_size_in_billions,
                q,
            );
            if file.is_file() {
                return file.parent().map(Path::to_path_buf);
            }
        }

        let dir = self.resolver.legacy_path(
            &llm.model_name,
            variant.model_format,
            &variant.model_size_in_billions,
        );
        (dir.is_dir() && llm_hit(llm, &dir, quantization)).then_some(dir)
    }

    /// Whether `spec` is cached, without touching the network or the index
    pub fn is_cached(&self, spec: &ModelSpec) -> CacheStatus {
        if spec.source().is_uri() {
            return CacheStatus::Single(self.resolver.entry_path(spec.model_name()).exists());
        }

        let cache_dir = self.resolver.resolve(spec);
        match spec {
            ModelSpec::Llm(llm) if llm.variant.model_format.is_quantized() => {
                CacheStatus::PerQuantization(
                    llm.variant
                        .quantizations
                        .iter()
                        .map(|q| {
                            self.legacy_dir(llm, Some(q)).is_some()
                                || llm_hit(llm, &cache_dir, Some(q))
                        })
                        .collect(),
                )
            }
            ModelSpec::Llm(llm) => CacheStatus::Single(
                self.legacy_dir(llm, None).is_some() || llm_hit(llm, &cache_dir, None),
            ),
            _ => {
                let marker = meta_path(
                    &cache_dir,
                    &MarkerKey::Snapshot {
                        hub: ModelHub::HuggingFace,
                    },
                );
                let mut revisions = self.index.revisions(spec.model_name());
                let own = spec.model_revision().map(str::to_string);
                if !revisions.contains(&own) {
                    revisions.push(own);
                }
                CacheStatus::Single(any_valid(&marker, revisions.iter().map(Option::as_deref)))
            }
        }
    }

    pub fn describe(&self, spec: &ModelSpec) -> ModelDescription {
        ModelDescription::from(spec)
    }

    /// Cache location and status per version of `spec`.
    ///
    /// A quantized LLM without a selected quantization yields one entry per
    /// declared quantization.
    pub fn version_info(&self, spec: &ModelSpec) -> Vec<ModelVersionInfo> {
        let location = self.resolver.resolve(spec).display().to_string();
        match spec {
            ModelSpec::Llm(llm)
                if llm.quantization.is_none() && !llm.variant.quantizations.is_empty() =>
            {
                let flags = match self.is_cached(spec) {
                    CacheStatus::PerQuantization(flags) => flags,
                    CacheStatus::Single(flag) => vec![flag; llm.variant.quantizations.len()],
                };
                llm.variant
                    .quantizations
                    .iter()
                    .zip(flags)
                    .map(|(q, cached)| ModelVersionInfo {
                        model_version: ModelSpec::Llm(llm.clone().with_quantization(q.as_str()))
                            .model_version(),
                        model_file_location: location.clone(),
                        cache_status: CacheStatus::Single(cached),
                    })
                    .collect()
            }
            _ => vec![ModelVersionInfo {
                model_version: spec.model_version(),
                model_file_location: location,
                cache_status: self.is_cached(spec),
            }],
        }
    }

    /// Delete the cache entry of `spec`. Symlinked entries are unlinked,
    /// their targets are left alone.
    pub async fn remove(&self, spec: &ModelSpec) -> StashResult<bool> {
        validate_model_name(spec.model_name())?;
        let entry = self.resolver.entry_path(spec.model_name());
        let meta = match tokio::fs::symlink_metadata(&entry).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            tokio::fs::remove_dir_all(&entry).await?;
        } else {
            tokio::fs::remove_file(&entry).await?;
        }
        info!(model_name = %spec.model_name(), path = %entry.display(), "Removed model from cache");
        Ok(true)
    }
}

/// Marker that records a hub download of `spec`
fn marker_key(spec: &ModelSpec) -> StashResult<MarkerKey> {
    let hub = spec.model_hub();
    Ok(match spec {
        ModelSpec::Llm(llm) if llm.variant.model_format.is_quantized() => MarkerKey::Quantized {
            hub,
            quantization: llm.require_quantization()?.to_string(),
        },
        ModelSpec::Llm(_) => MarkerKey::Snapshot { hub },
        _ => MarkerKey::Snapshot {
            hub: ModelHub::HuggingFace,
        },
    })
}

fn snapshot_request(spec: &ModelSpec, model_id: &str) -> StashResult<SnapshotRequest> {
    let revision = spec.model_revision().map(str::to_string);
    match spec {
        ModelSpec::Llm(llm) if llm.variant.model_format.is_quantized() => {
            let quantization = llm.require_quantization()?;
            let repo_id = model_id.replace("{quantization}", quantization);
            let request = SnapshotRequest::new(repo_id, revision);
            Ok(match llm.variant.files_for(quantization) {
                Some(files) => request.with_files(files),
                None => request,
            })
        }
        _ => Ok(SnapshotRequest::new(model_id, revision)),
    }
}

/// LLM marker check in `dir`.
///
/// A PyTorch snapshot from either hub is loadable, so the other hub's
/// snapshot marker also counts. Quantized layouts need their own marker.
fn llm_hit(llm: &LlmSpec, dir: &Path, quantization: Option<&str>) -> bool {
    let hub = llm.variant.source.model_hub();
    let revision = llm.variant.model_revision.as_deref();

    if llm.variant.model_format.is_quantized() {
        let Some(quantization) = quantization else {
            return false;
        };
        let key = MarkerKey::Quantized {
            hub,
            quantization: quantization.to_string(),
        };
        return is_valid(&meta_path(dir, &key), revision, None);
    }

    if is_valid(&meta_path(dir, &MarkerKey::Snapshot { hub }), revision, None) {
        return true;
    }
    ModelHub::ALL
        .into_iter()
        .filter(|other| *other != hub)
        .any(|other| {
            let found = meta_path(dir, &MarkerKey::Snapshot { hub: other }).exists();
            if found {
                warn!(
                    model_name = %llm.model_name,
                    path = %dir.display(),
                    from = %other,
                    "Cache exists, but it was from a different hub"
                );
            }
            found
        })
}
