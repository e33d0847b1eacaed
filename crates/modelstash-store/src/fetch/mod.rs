//! Ways of getting a model's files into its cache directory

pub mod hub;
pub mod local;
pub mod object;

pub use hub::{HuggingFaceRepository, ModelScopeRepository, RemoteRepository, SnapshotRequest};
pub use local::link_local_uri;
pub use object::{copy_tree, ObjectInfo, ObjectRead, ObjectStore, TransferOptions, WalkEntry};

use modelstash_core::{StashError, StashResult};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// The fetch strategy picked for one spec
pub enum ArtifactFetcher {
    /// Repository snapshot, or a subset of its files, from a model hub
    Hub {
        repository: Arc<dyn RemoteRepository>,
        request: SnapshotRequest,
    },
    /// Local directory linked into the cache
    Local { source: String },
    /// Objects under `root` copied from a remote store
    Object {
        store: Arc<dyn ObjectStore>,
        root: String,
        options: TransferOptions,
    },
}

impl std::fmt::Debug for ArtifactFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactFetcher::Hub { repository, request } => f
                .debug_struct("Hub")
                .field("hub", &repository.hub())
                .field("request", request)
                .finish(),
            ArtifactFetcher::Local { source } => {
                f.debug_struct("Local").field("source", source).finish()
            }
            ArtifactFetcher::Object { root, options, .. } => f
                .debug_struct("Object")
                .field("root", root)
                .field("options", options)
                .finish(),
        }
    }
}

impl ArtifactFetcher {
    /// Populate `cache_dir` and return the path the model is reachable at.
    pub async fn fetch(&self, model_name: &str, cache_dir: &Path) -> StashResult<PathBuf> {
        match self {
            ArtifactFetcher::Hub {
                repository,
                request,
            } => {
                let local_dir = repository.download(request, cache_dir).await?;
                if !same_dir(&local_dir, cache_dir) {
                    let source = local_dir.clone();
                    let dest = cache_dir.to_path_buf();
                    let linked = tokio::task::spawn_blocking(move || link_snapshot(&source, &dest))
                        .await
                        .map_err(|e| StashError::Internal(format!("link task failed: {e}")))??;
                    debug!(
                        model_name,
                        files = linked,
                        from = %local_dir.display(),
                        "Linked hub snapshot into cache"
                    );
                }
                Ok(cache_dir.to_path_buf())
            }
            ArtifactFetcher::Local { source } => link_local_uri(source, cache_dir).await,
            ArtifactFetcher::Object {
                store,
                root,
                options,
            } => copy_tree(store.clone(), root, cache_dir, model_name, options).await,
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Symlink every file under `source` into `dest`, keeping relative paths.
///
/// Links point at the resolved target so hub blob symlinks are not chained.
/// Returns the number of files linked.
pub fn link_snapshot(source: &Path, dest: &Path) -> StashResult<usize> {
    std::fs::create_dir_all(dest)?;
    let mut linked = 0;

    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(|e| StashError::Fetch(format!("failed to walk snapshot: {e}")))?;
        if entry.file_type().is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| StashError::Internal(e.to_string()))?;
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StashError::Fetch(format!(
                "refusing to link {} outside of {}",
                relative.display(),
                dest.display()
            )));
        }

        let target = entry.path().canonicalize()?;
        let link = dest.join(relative);
        if let Some(parent) = link.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        symlink_file(&target, &link)?;
        linked += 1;
    }

    info!(
        source = %source.display(),
        dest = %dest.display(),
        files = linked,
        "Linked snapshot files"
    );
    Ok(linked)
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_link_snapshot_nested() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("config.json"), b"{}").unwrap();
        std::fs::create_dir(source.path().join("1_Pooling")).unwrap();
        std::fs::write(source.path().join("1_Pooling/config.json"), b"{}").unwrap();

        let cache_dir = dest.path().join("bge");
        assert_eq!(link_snapshot(source.path(), &cache_dir).unwrap(), 2);

        let link = cache_dir.join("1_Pooling/config.json");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            source.path().join("1_Pooling/config.json").canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_link_snapshot_resolves_blob_links() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let blob = source.path().join("blob");
        std::fs::write(&blob, b"weights").unwrap();
        std::fs::create_dir(source.path().join("snapshot")).unwrap();
        std::os::unix::fs::symlink(&blob, source.path().join("snapshot/model.bin")).unwrap();

        link_snapshot(&source.path().join("snapshot"), dest.path()).unwrap();
        assert_eq!(
            std::fs::read_link(dest.path().join("model.bin")).unwrap(),
            blob.canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_link_snapshot_replaces_stale_links() {
        let source = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"new").unwrap();
        std::os::unix::fs::symlink("/nonexistent-12345", dest.path().join("a.txt")).unwrap();

        link_snapshot(source.path(), dest.path()).unwrap();
        assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"new");
    }
}
