use async_trait::async_trait;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::S3Settings;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Object storage for profile images, keyed by opaque server-generated keys.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ImageStoreError>;
}

/// Keys are generated by us (uuid simple form); anything else is refused
/// before it can reach a path or an object name.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= 64 && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub fn new_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3ImageStore {
    pub async fn new(settings: &S3Settings) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint);
        if let (Some(access), Some(secret)) = (&settings.access_key, &settings.secret_key) {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing: MinIO and local endpoints have no wildcard DNS.
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3 image store (bucket '{}')", settings.bucket);

        if let Err(e) = client.head_bucket().bucket(&settings.bucket).send().await {
            warn!("head_bucket failed for '{}' (will attempt create): {e:?}", settings.bucket);
            client
                .create_bucket()
                .bucket(&settings.bucket)
                .send()
                .await
                .map_err(|e2| anyhow::anyhow!("failed to ensure bucket '{}': {e2}", settings.bucket))?;
            info!("created bucket '{}'", settings.bucket);
        }

        Ok(Self { bucket: settings.bucket.clone(), client, prefix: "perfiles".into() })
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let object = self.key_for(key);
        if self.client.head_object().bucket(&self.bucket).key(&object).send().await.is_ok() {
            return Err(ImageStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object)
            .content_type(mime)
            .body(ByteStream::from(bytes.to_vec()));
        if let Err(e) = put.send().await {
            error!("put_object failed key={object} bucket={} err={e:?}", self.bucket);
            return Err(ImageStoreError::Other(e.to_string()));
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key_for(key))
            .send()
            .await
            .map_err(|_| ImageStoreError::NotFound)?;
        let stored_mime = obj.content_type().map(str::to_string);
        let data = obj.body.collect().await.map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let mime = stored_mime.unwrap_or_else(|| sniff_mime(&bytes));
        Ok((bytes, mime))
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key_for(key))
            .send()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        Ok(())
    }
}

// ---------------- Filesystem implementation (local development) ----------------
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ImageStoreError> {
        if !is_valid_key(key) {
            return Err(ImageStoreError::NotFound);
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, key: &str, _mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ImageStoreError::Duplicate);
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        tokio::fs::write(&path, bytes).await.map_err(|e| ImageStoreError::Other(e.to_string()))
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ImageStoreError::NotFound,
            _ => ImageStoreError::Other(e.to_string()),
        })?;
        let mime = sniff_mime(&bytes);
        Ok((bytes, mime))
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ImageStoreError::NotFound),
            Err(e) => Err(ImageStoreError::Other(e.to_string())),
        }
    }
}

/// S3 when an endpoint is configured, otherwise a local directory.
pub async fn build_image_store(s3: Option<&S3Settings>, fs_root: PathBuf) -> anyhow::Result<Arc<dyn ImageStore>> {
    match s3 {
        Some(settings) => Ok(Arc::new(S3ImageStore::new(settings).await?)),
        None => {
            info!("S3_ENDPOINT not set; storing images under '{}'", fs_root.display());
            Ok(Arc::new(FsImageStore::new(fs_root)))
        }
    }
}
