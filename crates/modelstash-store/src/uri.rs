//! Model URI parsing

use globset::Glob;
use modelstash_core::{StashError, StashResult};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Split a model URI into `(scheme, path)`.
///
/// Anything that names an existing local path, or a glob matching one, is
/// `file` even if it looks like a URL. Otherwise the URL's host and path
/// are concatenated (`s3://bucket/dir` → `("s3", "bucket/dir")`) exactly as
/// written, without percent-encoding. Missing and single-letter schemes
/// (`C:\models`) are `file` too.
pub fn parse_uri(uri: &str) -> (String, String) {
    if Path::new(uri).exists() || matches_local_glob(uri) {
        return ("file".to_string(), uri.to_string());
    }

    match url::Url::parse(uri) {
        Ok(parsed) if parsed.scheme().len() > 1 => {
            let path = match after_scheme(uri, parsed.scheme()) {
                Some(path) => path.to_string(),
                None => format!("{}{}", parsed.host_str().unwrap_or(""), parsed.path()),
            };
            (parsed.scheme().to_string(), path)
        }
        _ => ("file".to_string(), uri.to_string()),
    }
}

/// Authority and path of `uri` as written: `scheme://` is dropped, as are
/// any query and fragment.
fn after_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = uri.trim().split_once(':')?;
    if !head.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Whether `model_uri` points at something that can be cached.
///
/// Relative local paths are rejected with an error rather than `false`.
pub fn is_valid_model_uri(model_uri: Option<&str>) -> StashResult<bool> {
    let Some(model_uri) = model_uri.filter(|u| !u.is_empty()) else {
        return Ok(false);
    };

    let (scheme, root) = parse_uri(model_uri);
    if scheme == "file" {
        let root = Path::new(&root);
        if !root.is_absolute() {
            return Err(StashError::InvalidUri(format!(
                "Model URI cannot be a relative path: {model_uri}"
            )));
        }
        Ok(root.exists())
    } else {
        Ok(true)
    }
}

fn has_glob_meta(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// True if `pattern` is a glob that matches at least one local path.
fn matches_local_glob(pattern: &str) -> bool {
    if !has_glob_meta(pattern) {
        return false;
    }
    let Ok(glob) = Glob::new(pattern) else {
        return false;
    };
    let matcher = glob.compile_matcher();

    // Walk from the deepest directory that has no glob characters.
    let mut base = PathBuf::new();
    let mut depth = 0usize;
    let mut in_pattern = false;
    for component in Path::new(pattern).components() {
        let is_meta = matches!(
            component,
            Component::Normal(c) if has_glob_meta(&c.to_string_lossy())
        );
        if in_pattern || is_meta {
            in_pattern = true;
            depth += 1;
        } else {
            base.push(component);
        }
    }
    let walk_root = if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    };
    let relative = walk_root == Path::new(".");

    WalkDir::new(&walk_root)
        .min_depth(1)
        .max_depth(depth)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            let path = entry.path();
            let candidate = if relative {
                path.strip_prefix(".").unwrap_or(path)
            } else {
                path
            };
            matcher.is_match(candidate)
        })
}
