//! modelstash-store: Model artifact cache
//!
//! This crate provides:
//! - Cache layout and validity markers
//! - Hub, local and object-storage fetchers
//! - Retrying downloads with rollback
//! - The model registry and its revision index

pub mod cache;
pub mod fetch;
pub mod index;
pub mod layout;
pub mod metadata;
pub mod registry;
pub mod retry;
pub mod revision;
pub mod uri;

pub use cache::ModelCache;
pub use fetch::{ArtifactFetcher, ObjectStore, RemoteRepository, SnapshotRequest};
pub use index::CacheIndex;
pub use layout::{CacheDirectoryResolver, MarkerKey, MARKER_FILE};
pub use metadata::CacheMetadata;
pub use registry::{ModelRegistry, RegisteredModel};
pub use retry::{DownloadTarget, RetryingDownloadDriver};
pub use uri::{is_valid_model_uri, parse_uri};
