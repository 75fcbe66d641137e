//! ModelScope hub downloader.
//!
//! Mirrors a model repository into the local ModelScope cache so the ONNX
//! runtimes can load it from disk. Framework weight files the runtimes never
//! read are skipped.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use rag_eval_core::{RagError, Result, DEFAULT_REVISION};

use crate::retry::RetryPolicy;
use crate::runtime::ModelDownloader;

/// Public ModelScope API root.
pub const MODELSCOPE_ENDPOINT: &str = "https://www.modelscope.cn";

/// Weight formats the ONNX runtimes do not load.
const SKIPPED_EXTENSIONS: &[&str] = &["bin", "safetensors", "pt", "h5", "msgpack", "ckpt"];

/// Repository listing response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListingResponse {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ListingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListingData {
    #[serde(default)]
    files: Vec<RepoFile>,
}

/// One entry of a repository listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RepoFile {
    path: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(default)]
    size: u64,
}

impl RepoFile {
    fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

/// Whether `path` should be fetched at all.
fn wanted(path: &str) -> bool {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) => !SKIPPED_EXTENSIONS.contains(&ext.as_str()),
        None => true,
    }
}

/// Whether a listed path stays inside the model directory once joined.
fn is_contained(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Whether `dest` already holds a complete copy.
fn already_present(dest: &Path, expected_size: u64) -> bool {
    match dest.metadata() {
        Ok(meta) => meta.is_file() && (expected_size == 0 || meta.len() == expected_size),
        Err(_) => false,
    }
}

/// Default cache root: `$MODELSCOPE_CACHE`, else `<cache dir>/modelscope/hub`.
pub fn default_cache_root() -> PathBuf {
    if let Ok(dir) = std::env::var("MODELSCOPE_CACHE") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modelscope")
        .join("hub")
}

/// Downloads repositories from ModelScope into a local cache.
#[derive(Debug)]
pub struct ModelScopeDownloader {
    client: Client,
    endpoint: String,
    cache_root: PathBuf,
    retry: RetryPolicy,
    show_progress: bool,
}

impl ModelScopeDownloader {
    pub fn new() -> Result<Self> {
        Self::with_cache_root(default_cache_root())
    }

    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rag-eval/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: MODELSCOPE_ENDPOINT.to_string(),
            cache_root: cache_root.into(),
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
            },
            show_progress: true,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Point at a mirror or private deployment.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Local directory for `model_id` (e.g. `BAAI/bge-small-zh-v1.5`).
    pub fn model_dir(&self, model_id: &str) -> PathBuf {
        model_id
            .split('/')
            .filter(|part| !part.is_empty() && *part != "..")
            .fold(self.cache_root.clone(), |dir, part| dir.join(part))
    }

    fn listing_url(&self, model_id: &str, revision: &str) -> String {
        format!(
            "{}/api/v1/models/{}/repo/files?Revision={}&Recursive=true",
            self.endpoint, model_id, revision
        )
    }

    fn file_url(&self, model_id: &str, revision: &str, path: &str) -> String {
        format!(
            "{}/api/v1/models/{}/repo?Revision={}&FilePath={}",
            self.endpoint, model_id, revision, path
        )
    }

    fn list_files(&self, model_id: &str, revision: &str) -> Result<Vec<RepoFile>> {
        let url = self.listing_url(model_id, revision);
        debug!("Listing repository files: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RagError::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| RagError::transport(format!("Failed to read response: {}", e)))?;

        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RagError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        if !status.is_success() {
            return Err(RagError::download(
                model_id,
                format!("repository listing returned HTTP {}", status),
            ));
        }

        parse_listing(model_id, &body)
    }

    fn fetch_file(&self, model_id: &str, revision: &str, file: &RepoFile, dest: &Path) -> Result<()> {
        let url = self.file_url(model_id, revision, &file.path);
        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RagError::transport(format!("HTTP request failed for {}: {}", file.path, e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RagError::Api {
                status: status.as_u16(),
                message: format!("downloading {}", file.path),
            });
        }
        if !status.is_success() {
            return Err(RagError::download(
                model_id,
                format!("HTTP {} downloading {}", status, file.path),
            ));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let total = response.content_length().unwrap_or(file.size);
        let pb = if self.show_progress {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_message(file.path.clone());
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut tmp = dest.as_os_str().to_owned();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);

        let written = write_body(&mut response, &tmp, &pb)
            .map_err(|e| RagError::transport(format!("Download of {} interrupted: {}", file.path, e)));
        pb.finish_and_clear();

        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        };
        if file.size > 0 && written != file.size {
            let _ = std::fs::remove_file(&tmp);
            return Err(RagError::transport(format!(
                "{}: expected {} bytes, received {}",
                file.path, file.size, written
            )));
        }

        std::fs::rename(&tmp, dest)?;
        Ok(())
    }
}

/// Stream `response` into `tmp`, flushing before reporting the byte count.
fn write_body(response: &mut Response, tmp: &Path, pb: &ProgressBar) -> std::io::Result<u64> {
    let mut writer = pb.wrap_write(BufWriter::new(File::create(tmp)?));
    let written = response
        .copy_to(&mut writer)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    writer.flush()?;
    Ok(written)
}

/// Parse a listing body, keeping only files worth fetching.
fn parse_listing(model_id: &str, body: &str) -> Result<Vec<RepoFile>> {
    let listing: ListingResponse = serde_json::from_str(body)
        .map_err(|e| RagError::download(model_id, format!("invalid repository listing: {}", e)))?;

    if listing.code != 200 {
        return Err(RagError::download(
            model_id,
            listing
                .message
                .unwrap_or_else(|| format!("hub returned code {}", listing.code)),
        ));
    }

    Ok(listing
        .data
        .map(|d| d.files)
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f.is_blob() && wanted(&f.path))
        .filter(|f| {
            let contained = is_contained(&f.path);
            if !contained {
                warn!(model = model_id, path = %f.path, "Skipping listed file outside the model directory");
            }
            contained
        })
        .collect())
}

impl ModelDownloader for ModelScopeDownloader {
    fn download(&self, model_id: &str, revision: Option<&str>) -> Result<PathBuf> {
        let revision = revision.unwrap_or(DEFAULT_REVISION);
        let target_dir = self.model_dir(model_id);

        let files = self
            .retry
            .run("repository listing", || self.list_files(model_id, revision))?;
        if files.is_empty() {
            return Err(RagError::download(model_id, "repository has no usable files"));
        }

        let missing: Vec<&RepoFile> = files
            .iter()
            .filter(|f| !already_present(&target_dir.join(&f.path), f.size))
            .collect();

        if missing.is_empty() {
            debug!("{} already cached at {}", model_id, target_dir.display());
            return Ok(target_dir);
        }

        info!(
            model = model_id,
            revision,
            missing_files = missing.len(),
            dir = %target_dir.display(),
            "Downloading model files from ModelScope"
        );

        std::fs::create_dir_all(&target_dir)?;
        for file in missing {
            let dest = target_dir.join(&file.path);
            self.retry.run("file download", || {
                self.fetch_file(model_id, revision, file, &dest)
            })?;
        }

        info!(model = model_id, "All model files downloaded");
        Ok(target_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "Code": 200,
        "Data": {
            "Files": [
                {"Name": "config.json", "Path": "config.json", "Type": "blob", "Size": 42},
                {"Name": "onnx", "Path": "onnx", "Type": "tree", "Size": 0},
                {"Name": "model.onnx", "Path": "onnx/model.onnx", "Type": "blob", "Size": 1000},
                {"Name": "pytorch_model.bin", "Path": "pytorch_model.bin", "Type": "blob", "Size": 5000},
                {"Name": "model.safetensors", "Path": "model.safetensors", "Type": "blob", "Size": 5000},
                {"Name": "tokenizer.json", "Path": "tokenizer.json", "Type": "blob", "Size": 700}
            ]
        },
        "Message": "success",
        "Success": true
    }"#;

    #[test]
    fn test_wanted_skips_framework_weights() {
        assert!(wanted("onnx/model.onnx"));
        assert!(wanted("tokenizer.json"));
        assert!(wanted("LICENSE"));
        assert!(!wanted("pytorch_model.bin"));
        assert!(!wanted("model.SAFETENSORS"));
        assert!(!wanted("tf_model.h5"));
    }

    #[test]
    fn test_parse_listing() {
        let files = parse_listing("BAAI/bge-small-zh-v1.5", LISTING).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["config.json", "onnx/model.onnx", "tokenizer.json"]);
        assert_eq!(files[1].size, 1000);
    }

    #[test]
    fn test_parse_listing_unknown_model() {
        let body = r#"{"Code": 10010205001, "Message": "model not found", "Success": false}"#;
        let err = parse_listing("nobody/nothing", body).unwrap_err();
        assert_eq!(err.error_code(), "DOWNLOAD_ERROR");
        assert!(err.to_string().contains("model not found"));

        let err = parse_listing("nobody/nothing", "<html>").unwrap_err();
        assert_eq!(err.error_code(), "DOWNLOAD_ERROR");
    }

    #[test]
    fn test_model_dir_layout() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelScopeDownloader::with_cache_root(dir.path()).unwrap();
        assert_eq!(
            downloader.model_dir("BAAI/bge-small-zh-v1.5"),
            dir.path().join("BAAI").join("bge-small-zh-v1.5")
        );
        assert_eq!(
            downloader.model_dir("../escape"),
            dir.path().join("escape")
        );
    }

    #[test]
    fn test_urls() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = ModelScopeDownloader::with_cache_root(dir.path())
            .unwrap()
            .with_endpoint("http://mirror.local/");
        assert_eq!(
            downloader.listing_url("org/m", "master"),
            "http://mirror.local/api/v1/models/org/m/repo/files?Revision=master&Recursive=true"
        );
        assert_eq!(
            downloader.file_url("org/m", "v1", "onnx/model.onnx"),
            "http://mirror.local/api/v1/models/org/m/repo?Revision=v1&FilePath=onnx/model.onnx"
        );
    }

    #[test]
    fn test_already_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert!(!already_present(&path, 2));

        std::fs::write(&path, "{}").unwrap();
        assert!(already_present(&path, 2));
        assert!(already_present(&path, 0));
        assert!(!already_present(&path, 3));
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained("config.json"));
        assert!(is_contained("onnx/model.onnx"));
        assert!(is_contained("./tokenizer.json"));
        assert!(!is_contained(""));
        assert!(!is_contained("../config.json"));
        assert!(!is_contained("onnx/../../config.json"));
        assert!(!is_contained("/etc/passwd"));
    }

    #[test]
    fn test_parse_listing_drops_escaping_paths() {
        let body = r#"{
            "Code": 200,
            "Data": {"Files": [
                {"Path": "../../../escaped.txt", "Type": "blob", "Size": 5},
                {"Path": "/tmp/absolute.txt", "Type": "blob", "Size": 5},
                {"Path": "config.json", "Type": "blob", "Size": 2}
            ]}
        }"#;
        let files = parse_listing("org/m", body).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["config.json"]);
    }

    mod http {
        use super::*;
        use serde_json::json;
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        const LISTING_PATH: &str = "/api/v1/models/org/m/repo/files";
        const FILE_PATH: &str = "/api/v1/models/org/m/repo";

        fn instant(max_retries: u32) -> RetryPolicy {
            RetryPolicy {
                max_retries,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            }
        }

        fn listing(files: serde_json::Value) -> ResponseTemplate {
            ResponseTemplate::new(200).set_body_json(json!({
                "Code": 200,
                "Data": {"Files": files},
                "Message": "success",
                "Success": true
            }))
        }

        async fn serve_file(server: &MockServer, file: &str, body: &str, calls: u64) {
            Mock::given(method("GET"))
                .and(path(FILE_PATH))
                .and(query_param("FilePath", file))
                .respond_with(ResponseTemplate::new(200).set_body_string(body))
                .expect(calls)
                .mount(server)
                .await;
        }

        /// Download `org/m` on a blocking-pool thread.
        async fn download(server: &MockServer, cache_root: PathBuf, retry: RetryPolicy) -> Result<PathBuf> {
            let endpoint = server.uri();
            tokio::task::spawn_blocking(move || {
                let downloader = ModelScopeDownloader::with_cache_root(cache_root.clone())?
                    .with_endpoint(endpoint)
                    .with_progress(false)
                    .with_retry(retry);
                assert_eq!(downloader.cache_root(), cache_root.as_path());
                downloader.download("org/m", None)
            })
            .await
            .unwrap()
        }

        fn leftover_parts(dir: &Path) -> Vec<PathBuf> {
            let mut found = Vec::new();
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    found.extend(leftover_parts(&path));
                } else if path.extension().map_or(false, |e| e == "part") {
                    found.push(path);
                }
            }
            found
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_download_fetches_only_missing_files() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .and(query_param("Recursive", "true"))
                .respond_with(listing(json!([
                    {"Path": "config.json", "Type": "blob", "Size": 10},
                    {"Path": "onnx", "Type": "tree", "Size": 0},
                    {"Path": "onnx/model.onnx", "Type": "blob", "Size": 10},
                    {"Path": "pytorch_model.bin", "Type": "blob", "Size": 4},
                    {"Path": "tokenizer.json", "Type": "blob", "Size": 2}
                ])))
                .expect(1)
                .mount(&server)
                .await;
            serve_file(&server, "config.json", r#"{"dim": 4}"#, 1).await;
            serve_file(&server, "onnx/model.onnx", "onnx-bytes", 1).await;
            serve_file(&server, "pytorch_model.bin", "torch", 0).await;
            serve_file(&server, "tokenizer.json", "{}", 0).await;

            let cache = tempfile::tempdir().unwrap();
            let model_dir = cache.path().join("org").join("m");
            std::fs::create_dir_all(&model_dir).unwrap();
            std::fs::write(model_dir.join("tokenizer.json"), "{}").unwrap();

            let dir = download(&server, cache.path().to_path_buf(), instant(0))
                .await
                .unwrap();

            assert_eq!(dir, model_dir);
            assert_eq!(
                std::fs::read_to_string(dir.join("config.json")).unwrap(),
                r#"{"dim": 4}"#
            );
            assert_eq!(
                std::fs::read_to_string(dir.join("onnx").join("model.onnx")).unwrap(),
                "onnx-bytes"
            );
            assert!(!dir.join("pytorch_model.bin").exists());
            assert!(leftover_parts(cache.path()).is_empty());
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_download_ignores_paths_outside_model_dir() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .respond_with(listing(json!([
                    {"Path": "../../../escaped.txt", "Type": "blob", "Size": 5},
                    {"Path": "config.json", "Type": "blob", "Size": 2}
                ])))
                .mount(&server)
                .await;
            serve_file(&server, "../../../escaped.txt", "owned", 0).await;
            serve_file(&server, "config.json", "{}", 1).await;

            let root = tempfile::tempdir().unwrap();
            let cache = root.path().join("hub");
            let dir = download(&server, cache.clone(), instant(0)).await.unwrap();

            assert!(dir.join("config.json").exists());
            assert!(!root.path().join("escaped.txt").exists());
            assert!(!cache.join("escaped.txt").exists());
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_size_mismatch_leaves_no_partial_file() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .respond_with(listing(json!([
                    {"Path": "onnx/model.onnx", "Type": "blob", "Size": 100}
                ])))
                .mount(&server)
                .await;
            serve_file(&server, "onnx/model.onnx", "truncated", 2).await;

            let cache = tempfile::tempdir().unwrap();
            let err = download(&server, cache.path().to_path_buf(), instant(1))
                .await
                .unwrap_err();

            assert_eq!(err.error_code(), "TRANSPORT_ERROR");
            assert!(err.to_string().contains("expected 100 bytes"));
            let dest = cache.path().join("org").join("m").join("onnx").join("model.onnx");
            assert!(!dest.exists());
            assert!(leftover_parts(cache.path()).is_empty());
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_listing_server_error_is_retried() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .respond_with(ResponseTemplate::new(502))
                .up_to_n_times(1)
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .respond_with(listing(json!([
                    {"Path": "config.json", "Type": "blob", "Size": 2}
                ])))
                .expect(1)
                .mount(&server)
                .await;
            serve_file(&server, "config.json", "{}", 1).await;

            let cache = tempfile::tempdir().unwrap();
            let dir = download(&server, cache.path().to_path_buf(), instant(2))
                .await
                .unwrap();
            assert!(dir.join("config.json").exists());
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_listing_without_usable_files() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .respond_with(listing(json!([
                    {"Path": "pytorch_model.bin", "Type": "blob", "Size": 4},
                    {"Path": "onnx", "Type": "tree", "Size": 0}
                ])))
                .mount(&server)
                .await;

            let cache = tempfile::tempdir().unwrap();
            let err = download(&server, cache.path().to_path_buf(), instant(0))
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "DOWNLOAD_ERROR");
            assert!(err.to_string().contains("no usable files"));
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn test_missing_repository_is_download_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path(LISTING_PATH))
                .respond_with(ResponseTemplate::new(404))
                .expect(1)
                .mount(&server)
                .await;

            let cache = tempfile::tempdir().unwrap();
            let err = download(&server, cache.path().to_path_buf(), instant(3))
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "DOWNLOAD_ERROR");
        }
    }
}
