//! Upload writer — spools incoming files to disk, writes them to the bucket
//! under generated keys, and mints attachment descriptors.
//!
//! Requests are handled in two phases so a multipart parse failure can never
//! leave partial objects behind: the whole payload is spooled first, then
//! each file is pushed to the bucket in input order.

use crate::{
    config::StorageConfig,
    models::attachment::Attachment,
    services::object_store::{ObjectStorage, StoreError},
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use reqwest::Url;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("object storage is not configured")]
    NotConfigured,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// One file captured during the multipart parse phase, waiting to be written
/// to the bucket.
#[derive(Debug)]
pub struct SpooledUpload {
    /// Client-reported filename.
    pub name: String,
    /// Client-reported MIME type.
    pub content_type: Option<String>,
    /// Temporary copy on disk.
    pub path: PathBuf,
    /// Byte length counted while spooling.
    pub size: i64,
}

#[derive(Clone)]
pub struct UploadService {
    store: Option<Arc<dyn ObjectStorage>>,
    config: StorageConfig,
    /// Directory holding temporary spool files.
    pub spool_dir: PathBuf,
}

impl UploadService {
    pub fn new(
        store: Option<Arc<dyn ObjectStorage>>,
        config: StorageConfig,
        spool_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            config,
            spool_dir: spool_dir.into(),
        }
    }

    /// Stream one multipart file field into a spool file, counting bytes.
    /// The spool file is removed again if the stream or a write fails.
    pub async fn spool<S>(&self, stream: S) -> UploadResult<(PathBuf, i64)>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let tmp_path = self.spool_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(UploadError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(UploadError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }

        Ok((tmp_path, size_bytes))
    }

    /// Write a spooled file to the bucket and mint its descriptor.
    ///
    /// The spool copy is removed after a successful write; removal failure is
    /// logged and swallowed by policy. On a write failure the spool file is
    /// left for `discard_all` so the caller can abort the batch cleanly.
    pub async fn store_spooled(&self, upload: &SpooledUpload) -> UploadResult<Attachment> {
        let store = self.store.as_ref().ok_or(UploadError::NotConfigured)?;

        let key = mint_key(&upload.name);
        let content_type = upload
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".into());

        let data = fs::read(&upload.path).await?;
        store.put(&key, Bytes::from(data), &content_type).await?;
        debug!(key = %key, size = upload.size, "stored attachment object");

        self.discard(&upload.path).await;

        let url = public_object_base(&self.config).map(|base| format!("{base}/{key}"));
        Ok(Attachment {
            name: upload.name.clone(),
            key: Some(key),
            url,
            content_type,
            size: upload.size,
        })
    }

    /// Best-effort removal of a spool file.
    pub async fn discard(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove spool file {}: {}", path.display(), err);
            }
        }
    }

    /// Best-effort removal of every spool file in a batch.
    pub async fn discard_all(&self, uploads: &[SpooledUpload]) {
        for upload in uploads {
            self.discard(&upload.path).await;
        }
    }
}

/// Generate a globally unique object key:
/// `{unix-millis}_{random token}_{sanitized filename}`.
///
/// The random token is a UUIDv4 in simple form (lowercase hex), so two
/// uploads of the same filename in the same millisecond still get distinct
/// keys.
pub fn mint_key(filename: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let token = Uuid::new_v4().simple();
    format!("{}_{}_{}", millis, token, sanitize_filename(filename))
}

/// Collapse each whitespace run in a filename to a single underscore. No
/// other characters are filtered; object stores accept the rest verbatim.
fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
        } else {
            out.push(ch);
            in_whitespace = false;
        }
    }
    out
}

/// Public base URL for minted descriptors, in precedence order:
/// the configured public base (with the bucket path segment appended when the
/// base has no path component), else `{endpoint}/{bucket}`, else nothing.
pub fn public_object_base(config: &StorageConfig) -> Option<String> {
    let account_base = || {
        match (config.endpoint_url(), config.bucket.as_ref()) {
            (Some(endpoint), Some(bucket)) => Some(format!("{endpoint}/{bucket}")),
            _ => None,
        }
    };

    let Some(base) = config.public_base() else {
        return account_base();
    };

    match Url::parse(&base) {
        Ok(parsed) => {
            let has_path = !parsed.path().trim_matches('/').is_empty();
            match (&config.bucket, has_path) {
                // Host-only base: the bucket segment is missing, add it.
                (Some(bucket), false) => Some(format!("{base}/{bucket}")),
                // Base already carries a path, assume it is intentional.
                _ => Some(base),
            }
        }
        // Unparseable base: fall back to the account endpoint if possible,
        // otherwise keep the configured value verbatim.
        Err(_) => account_base().or(Some(base)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{collections::HashMap, sync::Mutex};

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, (Bytes, String)>>,
    }

    #[async_trait]
    impl ObjectStorage for MemoryStore {
        async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StoreError> {
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (data, content_type.to_string()));
            Ok(())
        }

        async fn get(
            &self,
            key: &str,
        ) -> Result<crate::services::object_store::StoredObject, StoreError> {
            let objects = self.objects.lock().unwrap();
            let (bytes, content_type) = objects
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            Ok(crate::services::object_store::StoredObject {
                bytes,
                content_type: Some(content_type),
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ObjectStorage for FailingStore {
        async fn put(
            &self,
            _key: &str,
            _data: Bytes,
            _content_type: &str,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("injected put failure".into()))
        }

        async fn get(
            &self,
            key: &str,
        ) -> Result<crate::services::object_store::StoredObject, StoreError> {
            Err(StoreError::NotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("injected delete failure".into()))
        }
    }

    fn storage_config(
        public: Option<&str>,
        account: Option<&str>,
        bucket: Option<&str>,
    ) -> StorageConfig {
        StorageConfig {
            bucket: bucket.map(String::from),
            account_id: account.map(String::from),
            storage_host: "r2.cloudflarestorage.com".into(),
            endpoint: None,
            region: "auto".into(),
            access_key_id: None,
            secret_access_key: None,
            public_base_url: public.map(String::from),
        }
    }

    fn assert_key_shape(key: &str, expected_suffix: &str) {
        let mut parts = key.splitn(3, '_');
        let millis = parts.next().unwrap();
        let token = parts.next().unwrap();
        let suffix = parts.next().unwrap();
        assert!(millis.chars().all(|c| c.is_ascii_digit()), "millis: {millis}");
        assert!(!token.is_empty());
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()),
            "token: {token}"
        );
        assert_eq!(suffix, expected_suffix);
    }

    #[test]
    fn sanitize_collapses_whitespace_runs() {
        assert_eq!(sanitize_filename("a b.txt"), "a_b.txt");
        assert_eq!(sanitize_filename("a \t b.txt"), "a_b.txt");
        assert_eq!(sanitize_filename(" leading.png"), "_leading.png");
        assert_eq!(sanitize_filename("no-ws.pdf"), "no-ws.pdf");
    }

    #[test]
    fn minted_keys_match_expected_shape() {
        assert_key_shape(&mint_key("a b.txt"), "a_b.txt");
    }

    #[test]
    fn minted_keys_are_unique_for_identical_names() {
        let a = mint_key("same.png");
        let b = mint_key("same.png");
        assert_ne!(a, b);
    }

    #[test]
    fn public_base_with_path_is_kept_verbatim() {
        let cfg = storage_config(Some("https://cdn.example.com/notes/"), None, Some("notes"));
        assert_eq!(
            public_object_base(&cfg).as_deref(),
            Some("https://cdn.example.com/notes")
        );
    }

    #[test]
    fn host_only_public_base_gains_bucket_segment() {
        let cfg = storage_config(Some("https://cdn.example.com"), None, Some("notes"));
        assert_eq!(
            public_object_base(&cfg).as_deref(),
            Some("https://cdn.example.com/notes")
        );
    }

    #[test]
    fn missing_public_base_falls_back_to_account_endpoint() {
        let cfg = storage_config(None, Some("acct123"), Some("notes"));
        assert_eq!(
            public_object_base(&cfg).as_deref(),
            Some("https://acct123.r2.cloudflarestorage.com/notes")
        );
    }

    #[test]
    fn unparseable_public_base_falls_back_to_account_endpoint() {
        let cfg = storage_config(Some("not a url"), Some("acct123"), Some("notes"));
        assert_eq!(
            public_object_base(&cfg).as_deref(),
            Some("https://acct123.r2.cloudflarestorage.com/notes")
        );
    }

    #[test]
    fn nothing_configured_means_no_public_url() {
        let cfg = storage_config(None, None, None);
        assert_eq!(public_object_base(&cfg), None);
    }

    #[tokio::test]
    async fn spool_counts_bytes_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(None, storage_config(None, None, None), dir.path());

        let chunks: Vec<io::Result<Bytes>> =
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"spool"))];
        let (path, size) = service.spool(futures::stream::iter(chunks)).await.unwrap();

        assert_eq!(size, 11);
        assert_eq!(fs::read(&path).await.unwrap(), b"hello spool");
    }

    #[tokio::test]
    async fn spool_cleans_up_after_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(None, storage_config(None, None, None), dir.path());

        let chunks: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::Other, "boom")),
        ];
        let err = service
            .spool(futures::stream::iter(chunks))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(remaining.is_empty(), "spool file should have been removed");
    }

    #[tokio::test]
    async fn store_spooled_mints_descriptor_and_removes_spool_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let service = UploadService::new(
            Some(store.clone()),
            storage_config(Some("https://cdn.example.com"), None, Some("notes")),
            dir.path(),
        );

        let path = dir.path().join(".tmp-test");
        fs::write(&path, b"0123456789").await.unwrap();
        let spooled = SpooledUpload {
            name: "a b.txt".into(),
            content_type: Some("text/plain".into()),
            path: path.clone(),
            size: 10,
        };

        let descriptor = service.store_spooled(&spooled).await.unwrap();
        let key = descriptor.key.clone().unwrap();
        assert_key_shape(&key, "a_b.txt");
        assert_eq!(descriptor.name, "a b.txt");
        assert_eq!(descriptor.size, 10);
        assert_eq!(descriptor.content_type, "text/plain");
        assert_eq!(
            descriptor.url.as_deref(),
            Some(format!("https://cdn.example.com/notes/{key}").as_str())
        );

        let stored = store.get(&key).await.unwrap();
        assert_eq!(stored.bytes.as_ref(), b"0123456789");
        assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
        assert!(!path.exists(), "spool file should be gone after success");
    }

    #[tokio::test]
    async fn store_spooled_defaults_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(
            Some(Arc::new(MemoryStore::default())),
            storage_config(None, None, None),
            dir.path(),
        );

        let path = dir.path().join(".tmp-ct");
        fs::write(&path, b"x").await.unwrap();
        let spooled = SpooledUpload {
            name: "blob".into(),
            content_type: None,
            path,
            size: 1,
        };

        let descriptor = service.store_spooled(&spooled).await.unwrap();
        assert_eq!(descriptor.content_type, "application/octet-stream");
        assert_eq!(descriptor.url, None);
    }

    #[tokio::test]
    async fn store_spooled_surfaces_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(
            Some(Arc::new(FailingStore)),
            storage_config(None, None, Some("notes")),
            dir.path(),
        );

        let path = dir.path().join(".tmp-fail");
        fs::write(&path, b"x").await.unwrap();
        let spooled = SpooledUpload {
            name: "doomed.bin".into(),
            content_type: None,
            path: path.clone(),
            size: 1,
        };

        let err = service.store_spooled(&spooled).await.unwrap_err();
        assert!(matches!(err, UploadError::Store(_)));
        assert!(path.exists(), "spool file is kept for batch cleanup");
    }

    #[tokio::test]
    async fn store_spooled_without_backend_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = UploadService::new(None, storage_config(None, None, None), dir.path());
        let spooled = SpooledUpload {
            name: "x".into(),
            content_type: None,
            path: dir.path().join("missing"),
            size: 0,
        };
        let err = service.store_spooled(&spooled).await.unwrap_err();
        assert!(matches!(err, UploadError::NotConfigured));
    }
}
