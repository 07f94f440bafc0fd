//! Object-store clients for bsync
//!
//! The replication engine talks to every bucket through the [`ObjectStore`] trait: paginated
//! listing, streaming reads, uploads with a content-type and a bucket existence probe. Nothing
//! else of the object-store API is used.
//!
//! # Backends
//!
//! - [`s3::S3Store`] - any S3-compatible service (AWS S3, Cloudflare R2, MinIO, ...)
//! - [`dir::DirStore`] - a local directory acting as a bucket, selected with `file://` endpoints
//! - [`memory::MemoryStore`] - an in-memory bucket with fault injection, used by tests
//!
//! A store is always bound to a single bucket. [`Connector`] implementations build stores from a
//! [`TargetEndpoint`], which is how the fan-out replicator gets one client per destination.

pub mod dir;
pub mod memory;
pub mod s3;

use std::sync::Arc;

/// Streaming body of an object being read
pub type ObjectReader = std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>;

/// Payload of an upload
#[derive(Debug, Clone)]
pub enum Body {
    /// contents of a local file, streamed by the backend
    File(std::path::PathBuf),
    Bytes(bytes::Bytes),
}

impl Body {
    /// Reads the whole payload into memory.
    pub async fn into_bytes(self) -> anyhow::Result<bytes::Bytes> {
        match self {
            Body::Bytes(bytes) => Ok(bytes),
            Body::File(path) => {
                use anyhow::Context;
                let data = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed reading {:?}", &path))?;
                Ok(bytes::Bytes::from(data))
            }
        }
    }
}

/// One entry of a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    /// placeholder object standing for a "directory" (key ending with `/`)
    pub is_directory_marker: bool,
}

impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        let is_directory_marker = key.ends_with('/');
        Self {
            key,
            size,
            is_directory_marker,
        }
    }
}

/// One page of a listing, `next` is the continuation token of the following page
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<ObjectEntry>,
    pub next: Option<String>,
}

/// Client of one bucket
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Lists one page of keys starting with `prefix`.
    async fn list(&self, prefix: &str, continuation: Option<String>) -> anyhow::Result<ListPage>;

    async fn get(&self, key: &str) -> anyhow::Result<ObjectReader>;

    /// Writes an object, replacing any previous object under the same key.
    async fn put(&self, key: &str, body: Body, content_type: &str) -> anyhow::Result<()>;

    /// Checks that the bucket exists and is reachable with the configured credentials.
    async fn head(&self) -> anyhow::Result<()>;
}

/// Static access key pair, handed to us already resolved
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// One object-store bucket in one region
///
/// The textual form is `REGION:BUCKET[@ENDPOINT_URL]`, e.g. `eu-west-1:media-eu` or
/// `auto:media@https://acct.r2.cloudflarestorage.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TargetEndpoint {
    pub region: String,
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl TargetEndpoint {
    pub fn new(region: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            endpoint_url: None,
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Rejects descriptors that cannot name a bucket.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.region.trim().is_empty() {
            return Err(anyhow::anyhow!("target {} has an empty region", self));
        }
        if self.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("target {} has an empty bucket name", self));
        }
        if matches!(&self.endpoint_url, Some(endpoint) if endpoint.trim().is_empty()) {
            return Err(anyhow::anyhow!("target {} has an empty endpoint url", self));
        }
        Ok(())
    }
}

impl std::fmt::Display for TargetEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.region, self.bucket)?;
        if let Some(endpoint) = &self.endpoint_url {
            write!(f, "@{endpoint}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for TargetEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (location, endpoint_url) = match s.split_once('@') {
            Some((location, endpoint)) => (location, Some(endpoint.to_string())),
            None => (s, None),
        };
        let (region, bucket) = location
            .split_once(':')
            .ok_or_else(|| format!("invalid target {s:?}, expected REGION:BUCKET[@ENDPOINT]"))?;
        let target = TargetEndpoint {
            region: region.to_string(),
            bucket: bucket.to_string(),
            endpoint_url,
        };
        target.validate().map_err(|err| format!("{err:#}"))?;
        Ok(target)
    }
}

/// Builds object-store clients for targets
#[async_trait::async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    async fn connect(&self, target: &TargetEndpoint) -> anyhow::Result<Arc<dyn ObjectStore>>;
}

/// Picks the backend from the endpoint: `file://` URLs map to [`dir::DirStore`], everything else
/// is treated as an S3-compatible service.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    credentials: Option<Credentials>,
}

impl DefaultConnector {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }
}

#[async_trait::async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, target: &TargetEndpoint) -> anyhow::Result<Arc<dyn ObjectStore>> {
        target.validate()?;
        if let Some(root) = target
            .endpoint_url
            .as_deref()
            .and_then(|endpoint| endpoint.strip_prefix("file://"))
        {
            let store = dir::DirStore::new(std::path::Path::new(root).join(&target.bucket));
            return Ok(Arc::new(store));
        }
        let credentials = self.credentials.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "no credentials configured for target {}, set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
                target
            )
        })?;
        Ok(Arc::new(s3::S3Store::new(target, &credentials)))
    }
}
