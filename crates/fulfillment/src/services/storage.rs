//! Object storage trait, a local filesystem backend and an in-memory backend.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{FulfillmentError, Result};
use crate::signing::UrlSigner;

/// The two buckets the pipeline reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Customer-uploaded artwork, `{order_id}/wrap.<ext>`.
    Artwork,
    /// Generated print documents, `{order_id}/print.<ext>`.
    Artifacts,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Artwork => "artwork",
            Bucket::Artifacts => "artifacts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "artwork" => Some(Bucket::Artwork),
            "artifacts" => Some(Bucket::Artifacts),
            _ => None,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability URL granting temporary read access to one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Trait for object storage operations.
///
/// `upload` is an idempotent upsert: writing the same path twice replaces
/// the object in place.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(&self, bucket: Bucket, path: &str, bytes: Bytes, content_type: &str)
    -> Result<()>;

    /// Fails with `ObjectNotFound` when the object does not exist.
    async fn download(&self, bucket: Bucket, path: &str) -> Result<Bytes>;

    async fn exists(&self, bucket: Bucket, path: &str) -> Result<bool>;

    async fn create_signed_url(&self, bucket: Bucket, path: &str, ttl: Duration)
    -> Result<SignedUrl>;
}

#[async_trait]
impl<T: ObjectStorage + ?Sized> ObjectStorage for Arc<T> {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        (**self).upload(bucket, path, bytes, content_type).await
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Bytes> {
        (**self).download(bucket, path).await
    }

    async fn exists(&self, bucket: Bucket, path: &str) -> Result<bool> {
        (**self).exists(bucket, path).await
    }

    async fn create_signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        ttl: Duration,
    ) -> Result<SignedUrl> {
        (**self).create_signed_url(bucket, path, ttl).await
    }
}

/// Shared handle to whichever storage backend is configured.
pub type SharedObjectStorage = Arc<dyn ObjectStorage>;

fn expiry(ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| FulfillmentError::Storage(format!("signed URL TTL out of range: {ttl:?}")))
}

/// Rejects absolute paths and `..` components.
fn validate_object_path(path: &str) -> Result<&Path> {
    let candidate = Path::new(path);
    let safe = !path.is_empty()
        && candidate
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(candidate)
    } else {
        Err(FulfillmentError::Storage(format!(
            "invalid object path: {path:?}"
        )))
    }
}

/// Filesystem-backed storage: one directory per bucket under `root`.
///
/// Signed URLs point at the service's own `/files` route.
#[derive(Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    fn object_path(&self, bucket: Bucket, path: &str) -> Result<PathBuf> {
        let relative = validate_object_path(path)?;
        Ok(self.root.join(bucket.as_str()).join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FulfillmentError::Storage(e.to_string()))?;
        }

        // Write then rename so readers never observe a partial object.
        let staging = target.with_extension(format!("{}.part", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| FulfillmentError::Storage(e.to_string()))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| FulfillmentError::Storage(e.to_string()))?;

        tracing::debug!(%bucket, path, "object stored");
        Ok(())
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Bytes> {
        let target = self.object_path(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                FulfillmentError::ObjectNotFound(format!("{bucket}/{path}")),
            ),
            Err(e) => Err(FulfillmentError::Storage(e.to_string())),
        }
    }

    async fn exists(&self, bucket: Bucket, path: &str) -> Result<bool> {
        let target = self.object_path(bucket, path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| FulfillmentError::Storage(e.to_string()))
    }

    async fn create_signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        ttl: Duration,
    ) -> Result<SignedUrl> {
        validate_object_path(path)?;
        let expires_at = expiry(ttl)?;
        Ok(SignedUrl {
            url: self.signer.sign(bucket.as_str(), path, expires_at),
            expires_at,
        })
    }
}

#[derive(Debug, Default)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

#[derive(Debug, Default)]
struct InMemoryStorageState {
    objects: HashMap<(Bucket, String), StoredObject>,
    uploads: HashMap<Bucket, usize>,
    download_delay: Option<Duration>,
}

/// In-memory object storage for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStorage {
    state: Arc<RwLock<InMemoryStorageState>>,
    fail_on_upload: Arc<AtomicBool>,
    fail_on_download: Arc<AtomicBool>,
}

impl InMemoryObjectStorage {
    /// Creates a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on upload calls.
    pub fn set_fail_on_upload(&self, fail: bool) {
        self.fail_on_upload.store(fail, Ordering::SeqCst);
    }

    /// Configures the service to fail on download calls.
    pub fn set_fail_on_download(&self, fail: bool) {
        self.fail_on_download.store(fail, Ordering::SeqCst);
    }

    /// Delays every download, widening race windows in tests.
    pub fn set_download_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().download_delay = delay;
    }

    /// Seeds an object without counting it as an upload.
    pub fn put(&self, bucket: Bucket, path: &str, data: impl Into<Bytes>, content_type: &str) {
        self.state.write().unwrap().objects.insert(
            (bucket, path.to_string()),
            StoredObject {
                data: data.into(),
                content_type: content_type.to_string(),
            },
        );
    }

    /// Removes an object.
    pub fn remove(&self, bucket: Bucket, path: &str) {
        self.state
            .write()
            .unwrap()
            .objects
            .remove(&(bucket, path.to_string()));
    }

    /// Returns a stored object's bytes.
    pub fn get(&self, bucket: Bucket, path: &str) -> Option<Bytes> {
        self.state
            .read()
            .unwrap()
            .objects
            .get(&(bucket, path.to_string()))
            .map(|o| o.data.clone())
    }

    /// Returns a stored object's content type.
    pub fn content_type(&self, bucket: Bucket, path: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .objects
            .get(&(bucket, path.to_string()))
            .map(|o| o.content_type.clone())
    }

    /// Returns the number of objects in a bucket.
    pub fn object_count(&self, bucket: Bucket) -> usize {
        self.state
            .read()
            .unwrap()
            .objects
            .keys()
            .filter(|(b, _)| *b == bucket)
            .count()
    }

    /// Returns how many successful uploads have been made to a bucket.
    pub fn upload_count(&self, bucket: Bucket) -> usize {
        self.state
            .read()
            .unwrap()
            .uploads
            .get(&bucket)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn upload(
        &self,
        bucket: Bucket,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<()> {
        validate_object_path(path)?;
        if self.fail_on_upload.load(Ordering::SeqCst) {
            return Err(FulfillmentError::Storage("upload rejected".to_string()));
        }
        self.put(bucket, path, bytes, content_type);
        *self.state.write().unwrap().uploads.entry(bucket).or_default() += 1;
        Ok(())
    }

    async fn download(&self, bucket: Bucket, path: &str) -> Result<Bytes> {
        let delay = self.state.read().unwrap().download_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on_download.load(Ordering::SeqCst) {
            return Err(FulfillmentError::Storage("download failed".to_string()));
        }
        self.get(bucket, path)
            .ok_or_else(|| FulfillmentError::ObjectNotFound(format!("{bucket}/{path}")))
    }

    async fn exists(&self, bucket: Bucket, path: &str) -> Result<bool> {
        Ok(self.get(bucket, path).is_some())
    }

    async fn create_signed_url(
        &self,
        bucket: Bucket,
        path: &str,
        ttl: Duration,
    ) -> Result<SignedUrl> {
        let expires_at = expiry(ttl)?;
        Ok(SignedUrl {
            url: format!(
                "memory://{bucket}/{path}?expires={}",
                expires_at.timestamp()
            ),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> (tempfile::TempDir, LocalObjectStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(
            dir.path(),
            UrlSigner::new("secret", "http://localhost:3000"),
        );
        (dir, storage)
    }

    #[tokio::test]
    async fn local_upload_is_an_upsert() {
        let (_dir, storage) = local();
        storage
            .upload(Bucket::Artwork, "o1/wrap.png", Bytes::from_static(b"one"), "image/png")
            .await
            .unwrap();
        storage
            .upload(Bucket::Artwork, "o1/wrap.png", Bytes::from_static(b"two"), "image/png")
            .await
            .unwrap();

        let data = storage.download(Bucket::Artwork, "o1/wrap.png").await.unwrap();
        assert_eq!(&data[..], b"two");
        assert!(storage.exists(Bucket::Artwork, "o1/wrap.png").await.unwrap());
        assert!(!storage.exists(Bucket::Artifacts, "o1/wrap.png").await.unwrap());
    }

    #[tokio::test]
    async fn local_missing_object() {
        let (_dir, storage) = local();
        let result = storage.download(Bucket::Artifacts, "nope/print.pdf").await;
        assert!(matches!(result, Err(FulfillmentError::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn local_rejects_traversal() {
        let (_dir, storage) = local();
        for path in ["../escape", "/etc/passwd", "", "a/../../b"] {
            let result = storage
                .upload(Bucket::Artwork, path, Bytes::from_static(b"x"), "image/png")
                .await;
            assert!(result.is_err(), "{path} should be rejected");
        }
    }

    #[tokio::test]
    async fn local_signed_url_points_at_files_route() {
        let (_dir, storage) = local();
        let signed = storage
            .create_signed_url(Bucket::Artifacts, "o1/print.pdf", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(
            signed
                .url
                .starts_with("http://localhost:3000/files/artifacts/o1/print.pdf?expires=")
        );
        assert!(signed.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn memory_failure_toggles() {
        let storage = InMemoryObjectStorage::new();
        storage.set_fail_on_upload(true);
        let result = storage
            .upload(Bucket::Artwork, "o1/wrap.png", Bytes::from_static(b"x"), "image/png")
            .await;
        assert!(result.is_err());
        assert_eq!(storage.upload_count(Bucket::Artwork), 0);

        storage.set_fail_on_upload(false);
        storage
            .upload(Bucket::Artwork, "o1/wrap.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();
        assert_eq!(storage.upload_count(Bucket::Artwork), 1);
        assert_eq!(storage.upload_count(Bucket::Artifacts), 0);
        assert_eq!(
            storage.content_type(Bucket::Artwork, "o1/wrap.png").as_deref(),
            Some("image/png")
        );

        storage.set_fail_on_download(true);
        assert!(storage.download(Bucket::Artwork, "o1/wrap.png").await.is_err());
    }

    #[test]
    fn bucket_parse() {
        assert_eq!(Bucket::parse("artwork"), Some(Bucket::Artwork));
        assert_eq!(Bucket::parse("artifacts"), Some(Bucket::Artifacts));
        assert_eq!(Bucket::parse("secrets"), None);
    }
}
