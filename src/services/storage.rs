use std::path::Path;

use anyhow::{Context, Result};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use tokio::sync::OnceCell;

use crate::config::ShipperConfig;

/// Narrow seam to the object store: one put per shipped file.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_file(&self, key: &str, source: &Path) -> Result<()>;
}

/// S3-backed storage. The client is built and the bucket ensured on the
/// first upload actually executed, so queueing a job never pays for or
/// fails on initialization.
pub struct S3Storage {
    access_key: Option<String>,
    secret_key: Option<String>,
    region: String,
    endpoint_url: Option<String>,
    bucket: String,
    client: OnceCell<Client>,
}

impl S3Storage {
    pub fn new(config: &ShipperConfig) -> Self {
        Self {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            bucket: config.bucket.clone(),
            client: OnceCell::new(),
        }
    }

    /// A failed initialization leaves the cell empty, so the next job
    /// retries instead of wedging the worker.
    async fn client(&self) -> Result<&Client> {
        self.client.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Client> {
        let mut loader = aws_config::from_env().region(Region::new(self.region.clone()));

        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        if let (Some(access_key), Some(secret_key)) = (&self.access_key, &self.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }

        let aws_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(self.endpoint_url.is_some())
            .build();
        let client = Client::from_conf(s3_config);

        self.ensure_bucket(&client).await?;

        tracing::info!("☁️  S3 storage ready (bucket: {})", self.bucket);
        Ok(client)
    }

    async fn ensure_bucket(&self, client: &Client) -> Result<()> {
        let head = client.head_bucket().bucket(&self.bucket).send().await;

        match head {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    tracing::info!("🪣 Creating bucket {}", self.bucket);
                    client
                        .create_bucket()
                        .bucket(&self.bucket)
                        .send()
                        .await
                        .with_context(|| format!("Failed to create bucket {}", self.bucket))?;
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(service_error))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Storage {
    async fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        let client = self.client().await?;

        let body = ByteStream::from_path(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;

        client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::BucketOwnerFullControl)
            .body(body)
            .send()
            .await?;

        Ok(())
    }
}

/// In-memory storage double that records every put. Delays and failures can
/// be injected per key to exercise queue ordering and error isolation.
#[derive(Default)]
pub struct RecordingStorage {
    uploads: std::sync::Mutex<Vec<RecordedUpload>>,
    delays: std::sync::Mutex<std::collections::HashMap<String, std::time::Duration>>,
    failures: std::sync::Mutex<std::collections::HashSet<String>>,
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub key: String,
    pub source: std::path::PathBuf,
    pub body: Vec<u8>,
}

impl RecordingStorage {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Makes the next puts of `key` sleep before completing.
    pub fn delay_key(&self, key: &str, delay: std::time::Duration) {
        self.delays.lock().unwrap().insert(key.to_string(), delay);
    }

    /// Makes every put of `key` fail.
    pub fn fail_key(&self, key: &str) {
        self.failures.lock().unwrap().insert(key.to_string());
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.key.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for RecordingStorage {
    async fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        let delay = self.delays.lock().unwrap().get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failures.lock().unwrap().contains(key) {
            anyhow::bail!("injected failure for {}", key);
        }

        let body = tokio::fs::read(source).await?;
        self.uploads.lock().unwrap().push(RecordedUpload {
            key: key.to_string(),
            source: source.to_path_buf(),
            body,
        });
        Ok(())
    }
}
