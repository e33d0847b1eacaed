//! Local directories linked into the cache

use crate::uri::parse_uri;
use modelstash_core::{StashError, StashResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Link the local directory named by `model_uri` at `entry_path`.
///
/// Validates the URI before touching the cache, so a relative path leaves
/// no trace behind.
pub async fn link_local_uri(model_uri: &str, entry_path: &Path) -> StashResult<PathBuf> {
    let model_uri = strip_trailing_slash(model_uri);
    let (scheme, root) = parse_uri(model_uri);
    if scheme != "file" {
        return Err(StashError::InvalidUri(format!(
            "Not a local model URI: {}",
            model_uri
        )));
    }

    let source = PathBuf::from(root);
    if !source.is_absolute() {
        return Err(StashError::InvalidUri(format!(
            "Model URI cannot be a relative path: {}",
            model_uri
        )));
    }
    if !tokio::fs::try_exists(&source).await? {
        return Err(StashError::InvalidUri(format!(
            "Model URI does not exist: {}",
            model_uri
        )));
    }

    if let Some(parent) = entry_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if let Ok(meta) = tokio::fs::symlink_metadata(entry_path).await {
        if meta.file_type().is_symlink() {
            warn!(path = %entry_path.display(), "Replacing dangling cache link");
            tokio::fs::remove_file(entry_path).await?;
        }
    }

    symlink_dir(&source, entry_path).await?;
    info!(
        source = %source.display(),
        path = %entry_path.display(),
        "Linked local model into cache"
    );
    Ok(entry_path.to_path_buf())
}

/// Drop one trailing `/`, keeping a bare root intact
pub(crate) fn strip_trailing_slash(uri: &str) -> &str {
    match uri.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() && !stripped.ends_with(':') => stripped,
        _ => uri,
    }
}

#[cfg(unix)]
async fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_dir(target, link).await
}
