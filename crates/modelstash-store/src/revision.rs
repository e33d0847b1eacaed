//! Cache validity checks against `__valid_download` markers

use modelstash_core::ModelHub;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Decide whether the marker at `meta_path` vouches for `expected_revision`.
///
/// - no marker: not cached
/// - marker that is not JSON: legacy cache, always valid
/// - JSON without `model_revision`/`revision`: not cached
/// - `expected_hub` set and different from the stored hub: valid, the
///   cache from the other hub is usable as is
/// - otherwise the stored revision must equal `expected_revision`
///
/// The read is synchronous: markers are a single small JSON object, and the
/// same check backs the non-async `ModelCache::is_cached`.
pub fn is_valid(
    meta_path: &Path,
    expected_revision: Option<&str>,
    expected_hub: Option<ModelHub>,
) -> bool {
    let content = match std::fs::read(meta_path) {
        Ok(content) => content,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %meta_path.display(), error = %err, "Failed to read cache marker");
            }
            return false;
        }
    };

    let meta: Value = match serde_json::from_slice(&content) {
        Ok(meta) => meta,
        Err(_) => {
            debug!(path = %meta_path.display(), "Legacy cache marker detected");
            return true;
        }
    };

    let Some(stored_revision) = stored_revision(&meta) else {
        warn!(
            path = %meta_path.display(),
            "No revision information in the cache marker"
        );
        return false;
    };

    if let Some(expected_hub) = expected_hub {
        let stored_hub = meta
            .get("model_hub")
            .and_then(Value::as_str)
            .unwrap_or(ModelHub::HuggingFace.as_str());
        if stored_hub != expected_hub.as_str() {
            info!(
                path = %meta_path.display(),
                stored_hub,
                expected_hub = %expected_hub,
                "Using model cache from a different hub"
            );
            return true;
        }
    }

    stored_revision.as_deref() == expected_revision
}

/// True if any of `revisions` is vouched for by the marker
pub fn any_valid<'a>(
    meta_path: &Path,
    revisions: impl IntoIterator<Item = Option<&'a str>>,
) -> bool {
    revisions
        .into_iter()
        .any(|revision| is_valid(meta_path, revision, None))
}

/// Stored revision: outer `None` when neither key is present, inner `None`
/// for an explicit `null`.
fn stored_revision(meta: &Value) -> Option<Option<String>> {
    let object = meta.as_object()?;
    let value = object
        .get("model_revision")
        .or_else(|| object.get("revision"))?;
    Some(match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn marker(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("__valid_download");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_matching_revision_and_hub() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"model_revision": "abc", "model_hub": "modelscope"}"#);
        assert!(is_valid(&path, Some("abc"), Some(ModelHub::ModelScope)));
        assert!(!is_valid(&path, Some("def"), Some(ModelHub::ModelScope)));
    }

    #[test]
    fn test_missing_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("__valid_download");
        assert!(!is_valid(&path, Some("abc"), None));
        assert!(!is_valid(&path, None, Some(ModelHub::HuggingFace)));
    }

    #[test]
    fn test_malformed_json_is_legacy_valid() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, "not json at all");
        assert!(is_valid(&path, Some("anything"), None));
        assert!(is_valid(&path, None, Some(ModelHub::ModelScope)));
    }

    #[test]
    fn test_legacy_revision_key() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"revision": "456", "model_hub": "huggingface"}"#);
        assert!(is_valid(&path, Some("456"), None));
        assert!(!is_valid(&path, Some("123"), None));
    }

    #[test]
    fn test_new_key_wins_over_legacy_key() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"model_revision": "new", "revision": "old"}"#);
        assert!(is_valid(&path, Some("new"), None));
        assert!(!is_valid(&path, Some("old"), None));
    }

    #[test]
    fn test_missing_revision_key_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"model_name": "bge", "model_hub": "huggingface"}"#);
        assert!(!is_valid(&path, Some("abc"), None));
        assert!(!is_valid(&path, None, Some(ModelHub::ModelScope)));

        let path = marker(&dir, r#"["model_revision"]"#);
        assert!(!is_valid(&path, None, None));
    }

    #[test]
    fn test_hub_mismatch_ignores_revision() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"model_revision": "abc"}"#);
        // Stored hub defaults to huggingface.
        assert!(is_valid(&path, Some("other"), Some(ModelHub::ModelScope)));
        assert!(!is_valid(&path, Some("other"), Some(ModelHub::HuggingFace)));
    }

    #[test]
    fn test_null_revision() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"model_revision": null}"#);
        assert!(is_valid(&path, None, None));
        assert!(!is_valid(&path, Some("abc"), None));
    }

    #[test]
    fn test_any_valid() {
        let dir = TempDir::new().unwrap();
        let path = marker(&dir, r#"{"model_revision": "r2"}"#);
        assert!(any_valid(&path, [Some("r1"), Some("r2")]));
        assert!(!any_valid(&path, [Some("r1"), None]));
        assert!(!any_valid(&path, std::iter::empty()));
    }
}
