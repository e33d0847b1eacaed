//! Object storage copies
//!
//! Every object under a source root is mirrored into the cache directory
//! through a small pool of concurrent transfers. The first failed file
//! stops transfers that have not started; the partial directory is removed.

use async_trait::async_trait;
use modelstash_core::{DownloadContext, ObjectStoreConfig, StashError, StashResult};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Readable object body
pub type ObjectRead = Box<dyn AsyncRead + Send + Unpin>;

/// One directory level of a recursive listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    /// Directory path, e.g. `bucket/dir/sub`
    pub dir: String,
    pub subdirs: Vec<String>,
    /// File names directly under `dir`
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
}

/// Minimal filesystem-like view of a remote store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Recursive listing below `prefix`, one entry per directory
    async fn walk(&self, prefix: &str) -> StashResult<Vec<WalkEntry>>;

    async fn open(&self, path: &str) -> StashResult<ObjectRead>;

    async fn info(&self, path: &str) -> StashResult<ObjectInfo>;
}

/// Knobs for a batch copy
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub max_parallel_transfers: usize,
    pub per_file_attempts: u32,
    pub chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_parallel_transfers: 4,
            per_file_attempts: 3,
            chunk_size: 1024 * 1024,
        }
    }
}

impl From<&modelstash_core::DownloadConfig> for TransferOptions {
    fn from(config: &modelstash_core::DownloadConfig) -> Self {
        Self {
            max_parallel_transfers: config.max_parallel_transfers.max(1),
            per_file_attempts: config.per_file_attempts.max(1),
            chunk_size: config.chunk_size.max(1),
        }
    }
}

/// Source object and its place in the cache
#[derive(Debug, Clone)]
struct Transfer {
    src: String,
    dst: PathBuf,
}

/// Pair every listed object with its destination under `cache_dir`.
fn plan(entries: &[WalkEntry], src_root: &str, cache_dir: &Path) -> StashResult<Vec<Transfer>> {
    let mut transfers = Vec::new();
    for entry in entries {
        let relative_dir = entry
            .dir
            .strip_prefix(src_root)
            .ok_or_else(|| {
                StashError::Fetch(format!("{} is not under {}", entry.dir, src_root))
            })?
            .trim_start_matches('/');

        for file in &entry.files {
            let relative = if relative_dir.is_empty() {
                PathBuf::from(file)
            } else {
                Path::new(relative_dir).join(file)
            };
            if !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err(StashError::Fetch(format!(
                    "refusing to copy {} outside of {}",
                    relative.display(),
                    cache_dir.display()
                )));
            }
            transfers.push(Transfer {
                src: format!("{}/{}", entry.dir.trim_end_matches('/'), file),
                dst: cache_dir.join(relative),
            });
        }
    }
    Ok(transfers)
}

/// Copy everything under `src_root` into `cache_dir`.
///
/// Any failure removes `cache_dir` and is reported as exhausted retries
/// for `model_name`. An empty listing is treated the same way.
pub async fn copy_tree(
    store: Arc<dyn ObjectStore>,
    src_root: &str,
    cache_dir: &Path,
    model_name: &str,
    options: &TransferOptions,
) -> StashResult<PathBuf> {
    match copy_all(store, src_root, cache_dir, options).await {
        Ok(count) => {
            info!(
                model_name,
                files = count,
                path = %cache_dir.display(),
                "Copied model from object storage"
            );
            Ok(cache_dir.to_path_buf())
        }
        Err(err) => {
            warn!(
                model_name,
                path = %cache_dir.display(),
                error = %err,
                "Removing partial model copy"
            );
            if let Err(e) = tokio::fs::remove_dir_all(cache_dir).await {
                debug!(path = %cache_dir.display(), error = %e, "Cleanup failed");
            }
            Err(StashError::ExhaustedRetries {
                model_name: model_name.to_string(),
                context: DownloadContext::default(),
                source: Box::new(err),
            })
        }
    }
}

async fn copy_all(
    store: Arc<dyn ObjectStore>,
    src_root: &str,
    cache_dir: &Path,
    options: &TransferOptions,
) -> StashResult<usize> {
    let src_root = src_root.trim_end_matches('/');
    let entries = store.walk(src_root).await?;
    let transfers = plan(&entries, src_root, cache_dir)?;
    if transfers.is_empty() {
        return Err(StashError::Fetch(format!("no objects found under {}", src_root)));
    }

    let total = transfers.len();
    let width = total.min(options.max_parallel_transfers.max(1));
    debug!(files = total, width, "Starting object transfers");

    let semaphore = Arc::new(Semaphore::new(width));
    let failed = Arc::new(AtomicBool::new(false));
    let mut tasks = JoinSet::new();

    for transfer in transfers {
        let store = store.clone();
        let semaphore = semaphore.clone();
        let failed = failed.clone();
        let options = options.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err((transfer.src, StashError::Internal(e.to_string()))),
            };
            // Transfers not yet started are skipped once anything failed.
            if failed.load(Ordering::SeqCst) {
                return Ok(false);
            }
            match copy_object(store.as_ref(), &transfer.src, &transfer.dst, &options).await {
                Ok(_) => Ok(true),
                Err(err) => {
                    failed.store(true, Ordering::SeqCst);
                    error!(src = %transfer.src, error = %err, "Object transfer failed");
                    Err((transfer.src, err))
                }
            }
        });
    }

    let mut failures = Vec::new();
    let mut first_error = None;
    let mut copied = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(true)) => copied += 1,
            Ok(Ok(false)) => {}
            Ok(Err((src, err))) => {
                failures.push(src);
                first_error.get_or_insert(err);
            }
            Err(e) => {
                first_error
                    .get_or_insert(StashError::Internal(format!("transfer task failed: {e}")));
            }
        }
    }

    match first_error {
        None => Ok(copied),
        Some(source) => Err(StashError::PartialBatch {
            failed: failures,
            source: Box::new(source),
        }),
    }
}

/// Copy one object with up to `per_file_attempts` tries; returns its size.
async fn copy_object(
    store: &dyn ObjectStore,
    src: &str,
    dst: &Path,
    options: &TransferOptions,
) -> StashResult<u64> {
    let mut attempt = 1;
    loop {
        match copy_once(store, src, dst, options.chunk_size).await {
            Ok(size) => {
                debug!(src, dst = %dst.display(), size, "Copied object");
                return Ok(size);
            }
            Err(err) if attempt < options.per_file_attempts => {
                warn!(src, attempt, error = %err, "Object copy failed, retrying");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn copy_once(
    store: &dyn ObjectStore,
    src: &str,
    dst: &Path,
    chunk_size: usize,
) -> StashResult<u64> {
    let mut reader = store.open(src).await?;
    let info = store.info(src).await?;
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut out = tokio::fs::File::create(dst).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut written = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| StashError::Fetch(format!("Failed to read {}: {}", src, e)))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        written += n as u64;
        debug!(src, written, total = info.size, "Copied chunk");
    }
    out.flush().await?;
    Ok(written)
}

/// Build the store for `scheme` from configuration, if one is compiled in.
pub async fn store_for_scheme(
    scheme: &str,
    config: &ObjectStoreConfig,
) -> Option<Arc<dyn ObjectStore>> {
    match scheme {
        #[cfg(feature = "s3")]
        "s3" => Some(Arc::new(s3::S3ObjectStore::from_config(config).await)),
        _ => {
            let _ = config;
            None
        }
    }
}

#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

#[cfg(feature = "s3")]
mod s3 {
    use super::*;
    use aws_sdk_s3::Client;

    /// S3 and S3-compatible storage
    pub struct S3ObjectStore {
        client: Client,
    }

    impl S3ObjectStore {
        pub fn new(client: Client) -> Self {
            Self { client }
        }

        pub async fn from_config(config: &ObjectStoreConfig) -> Self {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if config.anonymous {
                loader = loader.no_credentials();
            }
            if let Some(region) = &config.region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }
            if let Some(endpoint) = &config.endpoint_url {
                loader = loader.endpoint_url(endpoint);
            }
            let shared = loader.load().await;

            let s3_config = aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.endpoint_url.is_some())
                .build();
            Self::new(Client::from_conf(s3_config))
        }
    }

    fn split(path: &str) -> StashResult<(&str, &str)> {
        let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
        if bucket.is_empty() {
            return Err(StashError::InvalidUri(format!("s3 path needs a bucket: {}", path)));
        }
        Ok((bucket, key))
    }

    fn s3_error(e: impl std::fmt::Display) -> StashError {
        StashError::Fetch(format!("S3 error: {}", e))
    }

    #[async_trait]
    impl ObjectStore for S3ObjectStore {
        async fn walk(&self, prefix: &str) -> StashResult<Vec<WalkEntry>> {
            let (bucket, key_prefix) = split(prefix)?;
            let key_prefix = if key_prefix.is_empty() {
                String::new()
            } else {
                format!("{}/", key_prefix.trim_end_matches('/'))
            };

            let mut dirs: std::collections::BTreeMap<String, WalkEntry> = Default::default();
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(&key_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = page.map_err(s3_error)?;
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    if key.ends_with('/') {
                        continue;
                    }
                    let full = format!("{}/{}", bucket, key);
                    let (dir, file) = full.rsplit_once('/').unwrap_or((bucket, key));
                    dirs.entry(dir.to_string())
                        .or_insert_with(|| WalkEntry {
                            dir: dir.to_string(),
                            subdirs: Vec::new(),
                            files: Vec::new(),
                        })
                        .files
                        .push(file.to_string());
                }
            }
            Ok(dirs.into_values().collect())
        }

        async fn open(&self, path: &str) -> StashResult<ObjectRead> {
            let (bucket, key) = split(path)?;
            let object = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(s3_error)?;
            Ok(Box::new(object.body.into_async_read()))
        }

        async fn info(&self, path: &str) -> StashResult<ObjectInfo> {
            let (bucket, key) = split(path)?;
            let head = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(s3_error)?;
            Ok(ObjectInfo {
                size: head.content_length().unwrap_or_default().max(0) as u64,
            })
        }
    }
}
