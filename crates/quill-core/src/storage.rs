//! Scheme-based storage for notebooks and reports.
//!
//! Locations are plain strings. `s3://<bucket>/<key>` goes to the remote
//! [`ObjectStore`]; anything else is a local path. There is no retry: every
//! failed read or write is reported once, as a [`PersistError`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::document::Document;
use crate::error::{Error, PersistError, Result};

/// Prefix that routes a location to the remote object store.
pub const REMOTE_MARKER: &str = "s3://";

/// Default endpoint for [`HttpObjectStore`].
pub const DEFAULT_S3_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Error returned by object store backends.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// A parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Local filesystem path.
    Local(PathBuf),
    /// Object in a remote bucket.
    Remote { bucket: String, key: String },
}

impl Location {
    /// Parse a location string.
    ///
    /// Remote locators are split at the first `/` after the marker.
    pub fn parse(location: &str) -> Result<Self> {
        let Some(rest) = location.strip_prefix(REMOTE_MARKER) else {
            if location.is_empty() {
                return Err(Error::InvalidLocation("empty path".to_string()));
            }
            return Ok(Location::Local(PathBuf::from(location)));
        };

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Location::Remote {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(Error::InvalidLocation(format!(
                "{location} (expected {REMOTE_MARKER}<bucket>/<key>)"
            ))),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote { bucket, key } => write!(f, "{REMOTE_MARKER}{bucket}/{key}"),
        }
    }
}

/// Remote object storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object.
    async fn get(&self, bucket: &str, key: &str) -> std::result::Result<Vec<u8>, BackendError>;

    /// Create or replace an object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> std::result::Result<(), BackendError>;
}

/// Storage adapter routing locations to the local filesystem or a remote store.
#[derive(Clone)]
pub struct Storage {
    remote: Arc<dyn ObjectStore>,
}

impl Storage {
    pub fn new(remote: Arc<dyn ObjectStore>) -> Self {
        Self { remote }
    }

    /// Write `bytes` to `destination`, creating local parent directories as needed.
    pub async fn persist(&self, destination: &str, bytes: Vec<u8>) -> Result<()> {
        let failed = |message: String| PersistError {
            action: "write",
            location: destination.to_string(),
            message,
        };

        match Location::parse(destination)? {
            Location::Remote { bucket, key } => self
                .remote
                .put(&bucket, &key, bytes)
                .await
                .map_err(|e| failed(e.to_string()))?,
            Location::Local(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| failed(e.to_string()))?;
                }
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| failed(e.to_string()))?;
            }
        }

        tracing::debug!("Persisted {}", destination);
        Ok(())
    }

    /// Read the bytes at `source`.
    pub async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        let failed = |message: String| PersistError {
            action: "read",
            location: source.to_string(),
            message,
        };

        let bytes = match Location::parse(source)? {
            Location::Remote { bucket, key } => self
                .remote
                .get(&bucket, &key)
                .await
                .map_err(|e| failed(e.to_string()))?,
            Location::Local(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| failed(e.to_string()))?,
        };
        Ok(bytes)
    }

    /// Load a notebook from a local path or remote locator.
    pub async fn load_document(&self, source: &str) -> Result<Document> {
        let bytes = self.fetch(source).await?;
        let document = Document::from_bytes(&bytes)?;
        tracing::debug!("Loaded {} ({} cells)", source, document.len());
        Ok(document)
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(Arc::new(HttpObjectStore::default()))
    }
}

/// S3-compatible object store over plain HTTP (path-style, unsigned requests).
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }
}

impl Default for HttpObjectStore {
    fn default() -> Self {
        Self::new(DEFAULT_S3_ENDPOINT)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> std::result::Result<Vec<u8>, BackendError> {
        let response = self
            .client
            .get(self.url(bucket, key))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> std::result::Result<(), BackendError> {
        self.client
            .put(self.url(bucket, key))
            .header(reqwest::header::CONTENT_TYPE, content_type(key))
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn content_type(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => "text/html; charset=utf-8",
        Some("ipynb") | Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// In-process object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<FxHashMap<(String, String), Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly.
    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), bytes.into());
        }
    }

    /// Copy of a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().ok()?;
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent `put` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> std::result::Result<Vec<u8>, BackendError> {
        self.object(bucket, key)
            .ok_or_else(|| format!("no such object: {bucket}/{key}").into())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
    ) -> std::result::Result<(), BackendError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err("write rejected".into());
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| "object store lock poisoned")?;
        objects.insert((bucket.to_string(), key.to_string()), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_local_paths() {
        assert_eq!(
            Location::parse("output.html").unwrap(),
            Location::Local(PathBuf::from("output.html"))
        );
        assert_eq!(
            Location::parse("/tmp/a/b.ipynb").unwrap(),
            Location::Local(PathBuf::from("/tmp/a/b.ipynb"))
        );
        assert!(Location::parse("").is_err());
    }

    #[test]
    fn test_parse_remote_splits_at_first_separator() {
        let location = Location::parse("s3://notebooks/even_further/one_cell_notebook.html").unwrap();
        assert_eq!(
            location,
            Location::Remote {
                bucket: "notebooks".to_string(),
                key: "even_further/one_cell_notebook.html".to_string(),
            }
        );
        assert!(location.is_remote());
        assert_eq!(
            location.to_string(),
            "s3://notebooks/even_further/one_cell_notebook.html"
        );
    }

    #[test]
    fn test_parse_rejects_incomplete_remote() {
        assert!(matches!(
            Location::parse("s3://bucket"),
            Err(Error::InvalidLocation(_))
        ));
        assert!(matches!(
            Location::parse("s3://bucket/"),
            Err(Error::InvalidLocation(_))
        ));
        assert!(matches!(
            Location::parse("s3:///key"),
            Err(Error::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_http_store_urls() {
        let store = HttpObjectStore::new("http://localhost:9000/");
        assert_eq!(store.url("b", "k/x.html"), "http://localhost:9000/b/k/x.html");
        assert_eq!(content_type("k/x.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("nb.ipynb"), "application/json");
    }

    #[tokio::test]
    async fn test_local_persist_creates_parent_directories() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("reports/daily/out.html");
        let storage = Storage::new(Arc::new(MemoryObjectStore::new()));

        storage
            .persist(target.to_str().unwrap(), b"<html></html>".to_vec())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"<html></html>");

        let read = storage.fetch(target.to_str().unwrap()).await.unwrap();
        assert_eq!(read, b"<html></html>");
    }

    #[tokio::test]
    async fn test_remote_persist_goes_to_object_store() {
        let remote = Arc::new(MemoryObjectStore::new());
        let storage = Storage::new(remote.clone());

        storage
            .persist("s3://notebooks/runs/report.html", b"report".to_vec())
            .await
            .unwrap();
        assert_eq!(
            remote.object("notebooks", "runs/report.html").as_deref(),
            Some(&b"report"[..])
        );
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_persist_errors() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.set_fail_writes(true);
        let storage = Storage::new(remote);

        let err = storage
            .persist("s3://bucket/key.html", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persist(PersistError { action: "write", .. })));

        let err = storage.fetch("s3://bucket/missing.ipynb").await.unwrap_err();
        assert!(matches!(err, Error::Persist(PersistError { action: "read", .. })));

        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.ipynb");
        let err = storage.fetch(missing.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::Persist(_)));
    }

    #[tokio::test]
    async fn test_load_document_from_remote() {
        let remote = Arc::new(MemoryObjectStore::new());
        let doc = Document::new(vec![crate::document::Cell::code("x = 1")]);
        remote.insert("notebooks", "one_cell_notebook.ipynb", doc.to_bytes().unwrap());
        let storage = Storage::new(remote);

        let loaded = storage
            .load_document("s3://notebooks/one_cell_notebook.ipynb")
            .await
            .unwrap();
        assert_eq!(loaded, doc);
    }
}
