//! Known revisions per registered model

use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::debug;

/// Model name to the revisions registered under it.
///
/// Shared behind an `Arc` between the registry, which writes it, and the
/// cache, which only reads it.
#[derive(Debug, Default)]
pub struct CacheIndex {
    revisions: DashMap<String, BTreeSet<Option<String>>>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `model_name` may be cached at `revision`
    pub fn record(&self, model_name: &str, revision: Option<&str>) {
        self.revisions
            .entry(model_name.to_string())
            .or_default()
            .insert(revision.map(str::to_string));
        debug!(model_name, ?revision, "Recorded model revision");
    }

    /// Revisions recorded for `model_name`, empty if none
    pub fn revisions(&self, model_name: &str) -> Vec<Option<String>> {
        self.revisions
            .get(model_name)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, model_name: &str) -> bool {
        self.revisions.contains_key(model_name)
    }

    /// Drop everything recorded for `model_name`
    pub fn forget(&self, model_name: &str) -> bool {
        self.revisions.remove(model_name).is_some()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_empty() {
        let index = CacheIndex::new();
        assert!(index.is_empty());
        assert!(index.revisions("bge").is_empty());
        // Queries never create entries.
        assert!(!index.contains("bge"));
    }

    #[test]
    fn test_record_and_forget() {
        let index = CacheIndex::new();
        index.record("bge", Some("r1"));
        index.record("bge", Some("r2"));
        index.record("bge", Some("r1"));
        index.record("whisper", None);

        assert_eq!(
            index.revisions("bge"),
            vec![Some("r1".to_string()), Some("r2".to_string())]
        );
        assert_eq!(index.revisions("whisper"), vec![None]);
        assert_eq!(index.len(), 2);

        assert!(index.forget("bge"));
        assert!(!index.forget("bge"));
        assert!(index.revisions("bge").is_empty());
    }
}
