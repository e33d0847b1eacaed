//! Model hub backends

use async_trait::async_trait;
use futures::StreamExt;
use hf_hub::api::tokio::{Api, ApiBuilder};
use hf_hub::{Repo, RepoType};
use modelstash_core::{ModelHub, StashConfig, StashError, StashResult};
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// What to pull from a hub repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub repo_id: String,
    pub revision: Option<String>,
    /// Restrict the download to these files; `None` pulls every file
    pub allow_files: Option<Vec<String>>,
}

impl SnapshotRequest {
    pub fn new(repo_id: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision,
            allow_files: None,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.allow_files = Some(files);
        self
    }
}

/// A hub that can materialize a repository snapshot locally
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    fn hub(&self) -> ModelHub;

    /// Download `request` and return the directory holding its files.
    ///
    /// Backends may fill `destination` directly or stage files in their
    /// own cache and return that directory instead.
    async fn download(&self, request: &SnapshotRequest, destination: &Path) -> StashResult<PathBuf>;
}

/// HuggingFace Hub through `hf-hub`'s content-addressed cache
pub struct HuggingFaceRepository {
    api: Api,
}

impl HuggingFaceRepository {
    pub fn new(cache_dir: PathBuf, endpoint: &str, token: Option<String>) -> StashResult<Self> {
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir)
            .with_endpoint(endpoint.to_string())
            .with_token(token)
            .with_progress(false)
            .build()
            .map_err(|e| StashError::Config(format!("Failed to create HF API client: {}", e)))?;
        Ok(Self { api })
    }

    pub fn from_config(config: &StashConfig) -> StashResult<Self> {
        Self::new(
            config.storage.hub_cache_root.join("huggingface"),
            &config.hub.huggingface_endpoint,
            config.hub.token.clone(),
        )
    }
}

#[async_trait]
impl RemoteRepository for HuggingFaceRepository {
    fn hub(&self) -> ModelHub {
        ModelHub::HuggingFace
    }

    async fn download(
        &self,
        request: &SnapshotRequest,
        _destination: &Path,
    ) -> StashResult<PathBuf> {
        let repo_id = request.repo_id.clone();
        let repo = self.api.repo(match &request.revision {
            Some(revision) => {
                Repo::with_revision(repo_id.clone(), RepoType::Model, revision.clone())
            }
            None => Repo::model(repo_id.clone()),
        });

        let files = match &request.allow_files {
            Some(files) => files.clone(),
            None => repo
                .info()
                .await
                .map_err(|e| StashError::Fetch(format!("Failed to list {}: {}", repo_id, e)))?
                .siblings
                .into_iter()
                .map(|s| s.rfilename)
                .collect(),
        };
        info!(repo_id = %repo_id, files = files.len(), "Downloading from HuggingFace");

        let mut snapshot_dir = None;
        for file in &files {
            debug!(repo_id = %repo_id, file = %file, "Downloading file");
            let path = repo
                .get(file)
                .await
                .map_err(|e| StashError::Fetch(format!("Failed to download {}: {}", file, e)))?;
            if snapshot_dir.is_none() {
                snapshot_dir = snapshot_root(&path, file);
            }
        }

        snapshot_dir.ok_or_else(|| {
            StashError::Fetch(format!("Repository {} has no files to download", repo_id))
        })
    }
}

/// Directory that `rfilename` was resolved against to produce `path`
fn snapshot_root(path: &Path, rfilename: &str) -> Option<PathBuf> {
    let depth = Path::new(rfilename).components().count();
    path.ancestors().nth(depth).map(Path::to_path_buf)
}

/// ModelScope over its HTTP API, staged under `<hub_cache>/modelscope`
pub struct ModelScopeRepository {
    client: reqwest::Client,
    endpoint: String,
    staging_root: PathBuf,
}

const MODELSCOPE_DEFAULT_REVISION: &str = "master";

#[derive(Debug, Deserialize)]
struct FileListing {
    #[serde(rename = "Data")]
    data: FileListingData,
}

#[derive(Debug, Deserialize)]
struct FileListingData {
    #[serde(rename = "Files", default)]
    files: Vec<RepoFile>,
}

#[derive(Debug, Deserialize)]
struct RepoFile {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Type")]
    kind: String,
}

impl ModelScopeRepository {
    pub fn new(staging_root: PathBuf, endpoint: &str) -> StashResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("modelstash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StashError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            staging_root,
        })
    }

    pub fn from_config(config: &StashConfig) -> StashResult<Self> {
        Self::new(
            config.storage.hub_cache_root.join("modelscope"),
            &config.hub.modelscope_endpoint,
        )
    }

    fn api_url(&self, repo_id: &str, tail: &str, params: &[(&str, &str)]) -> StashResult<url::Url> {
        let base = format!("{}/api/v1/models/{}/{}", self.endpoint, repo_id, tail);
        url::Url::parse_with_params(&base, params)
            .map_err(|e| StashError::Config(format!("Invalid ModelScope endpoint {}: {}", base, e)))
    }

    /// `<staging_root>/<repo_id>/<revision>`, kept inside the staging root
    fn staging_dir(&self, repo_id: &str, revision: &str) -> StashResult<PathBuf> {
        if !is_safe_relative(repo_id) || !is_safe_relative(revision) {
            return Err(StashError::InvalidSpec(format!(
                "Invalid ModelScope repository {}@{}",
                repo_id, revision
            )));
        }
        Ok(self.staging_root.join(repo_id).join(revision))
    }

    async fn list_files(&self, repo_id: &str, revision: &str) -> StashResult<Vec<String>> {
        let url = self.api_url(
            repo_id,
            "repo/files",
            &[("Revision", revision), ("Recursive", "true")],
        )?;
        let listing: FileListing = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| StashError::Fetch(format!("Failed to list {}: {}", repo_id, e)))?
            .json()
            .await
            .map_err(|e| StashError::Fetch(format!("Bad file listing for {}: {}", repo_id, e)))?;
        Ok(listing.into_blob_paths())
    }

    async fn download_file(
        &self,
        repo_id: &str,
        revision: &str,
        file: &str,
        dest: &Path,
    ) -> StashResult<()> {
        let url = self.api_url(repo_id, "repo", &[("Revision", revision), ("FilePath", file)])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| StashError::Fetch(format!("Failed to download {}: {}", file, e)))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);
        let result: StashResult<()> = async {
            let mut out = tokio::fs::File::create(&partial).await?;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| StashError::Fetch(format!("Failed to download {}: {}", file, e)))?;
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            drop(out);
            tokio::fs::rename(&partial, dest).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }
}

impl FileListing {
    fn into_blob_paths(self) -> Vec<String> {
        self.data
            .files
            .into_iter()
            .filter(|f| f.kind != "tree")
            .map(|f| f.path)
            .collect()
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.partial", name))
}

fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait]
impl RemoteRepository for ModelScopeRepository {
    fn hub(&self) -> ModelHub {
        ModelHub::ModelScope
    }

    async fn download(
        &self,
        request: &SnapshotRequest,
        _destination: &Path,
    ) -> StashResult<PathBuf> {
        let revision = request
            .revision
            .as_deref()
            .unwrap_or(MODELSCOPE_DEFAULT_REVISION);
        let staging = self.staging_dir(&request.repo_id, revision)?;
        let files = match &request.allow_files {
            Some(files) => files.clone(),
            None => self.list_files(&request.repo_id, revision).await?,
        };
        if files.is_empty() {
            return Err(StashError::Fetch(format!(
                "Repository {} has no files to download",
                request.repo_id
            )));
        }

        info!(
            repo_id = %request.repo_id,
            revision,
            files = files.len(),
            "Downloading from ModelScope"
        );

        for file in &files {
            if !is_safe_relative(file) {
                return Err(StashError::Fetch(format!(
                    "Refusing to download {} outside of the repository",
                    file
                )));
            }
            let dest = staging.join(file);
            if tokio::fs::try_exists(&dest).await? {
                debug!(file = %file, "Already staged, skipping download");
                continue;
            }
            debug!(repo_id = %request.repo_id, file = %file, "Downloading file");
            self.download_file(&request.repo_id, revision, file, &dest)
                .await?;
        }

        Ok(staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_root() {
        let path = Path::new("/hub/models--BAAI--bge/snapshots/abc/1_Pooling/config.json");
        assert_eq!(
            snapshot_root(path, "1_Pooling/config.json"),
            Some(PathBuf::from("/hub/models--BAAI--bge/snapshots/abc"))
        );
        assert_eq!(
            snapshot_root(Path::new("/snap/config.json"), "config.json"),
            Some(PathBuf::from("/snap"))
        );
    }

    #[test]
    fn test_modelscope_listing_skips_directories() {
        let listing: FileListing = serde_json::from_str(
            r#"{
                "Code": 200,
                "Data": {"Files": [
                    {"Path": "config.json", "Type": "blob", "Size": 10},
                    {"Path": "1_Pooling", "Type": "tree"},
                    {"Path": "1_Pooling/config.json", "Type": "blob"}
                ]}
            }"#,
        )
        .unwrap();
        assert_eq!(
            listing.into_blob_paths(),
            vec!["config.json".to_string(), "1_Pooling/config.json".to_string()]
        );
    }

    #[test]
    fn test_modelscope_urls() {
        let repo =
            ModelScopeRepository::new(PathBuf::from("/tmp/ms"), "https://www.modelscope.cn/")
                .unwrap();
        let url = repo
            .api_url("qwen/Qwen-7B", "repo", &[("Revision", "v1.0"), ("FilePath", "a b.json")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.modelscope.cn/api/v1/models/qwen/Qwen-7B/repo?Revision=v1.0&FilePath=a+b.json"
        );
    }

    #[test]
    fn test_safe_relative_paths() {
        assert!(is_safe_relative("config.json"));
        assert!(is_safe_relative("1_Pooling/config.json"));
        assert!(!is_safe_relative("../escape"));
        assert!(!is_safe_relative("/etc/passwd"));
        assert!(!is_safe_relative(""));
    }

    #[tokio::test]
    async fn test_modelscope_staging_stays_inside_root() {
        let root = tempfile::tempdir().unwrap();
        let staging_root = root.path().join("modelscope");
        let repo = ModelScopeRepository::new(staging_root.clone(), "http://127.0.0.1:9").unwrap();
        assert_eq!(
            repo.staging_dir("qwen/Qwen-7B", "v1.0").unwrap(),
            staging_root.join("qwen/Qwen-7B/v1.0")
        );

        for (repo_id, revision) in [
            ("qwen/Qwen-7B", "../../escape"),
            ("../qwen", "master"),
            ("/abs/repo", "master"),
            ("qwen/Qwen-7B", ".."),
        ] {
            let request = SnapshotRequest::new(repo_id, Some(revision.to_string()))
                .with_files(vec!["config.json".to_string()]);
            let err = repo.download(&request, root.path()).await.unwrap_err();
            assert!(matches!(err, StashError::InvalidSpec(_)), "{repo_id}@{revision}");
        }
        assert!(!root.path().join("escape").exists());
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/staging/model.bin")),
            PathBuf::from("/staging/.model.bin.partial")
        );
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_huggingface_single_file() {
        let cache = tempfile::tempdir().unwrap();
        let repo =
            HuggingFaceRepository::new(cache.path().to_path_buf(), "https://huggingface.co", None)
                .unwrap();
        let request = SnapshotRequest::new("BAAI/bge-small-en-v1.5", None)
            .with_files(vec!["config.json".to_string()]);
        let dir = repo.download(&request, cache.path()).await.unwrap();
        assert!(dir.join("config.json").exists());
    }
}
