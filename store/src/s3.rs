//! S3-compatible backend
//!
//! Works against AWS S3 as well as services that speak the same API behind a custom endpoint
//! (Cloudflare R2 uses region `auto` and `https://<account>.r2.cloudflarestorage.com`).

use anyhow::Context;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use tracing::instrument;

use crate::{Body, Credentials, ListPage, ObjectEntry, ObjectReader, ObjectStore, TargetEndpoint};

#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub fn new(target: &TargetEndpoint, credentials: &Credentials) -> Self {
        let credentials = aws_credential_types::Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            None,
            None,
            "bsync",
        );
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(target.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &target.endpoint_url {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(config.build()),
            bucket: target.bucket.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list(&self, prefix: &str, continuation: Option<String>) -> anyhow::Result<ListPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .with_context(|| {
                format!("failed listing objects under {:?} in {}", prefix, &self.bucket)
            })?;
        let entries = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let size = object.size().unwrap_or_default().max(0) as u64;
                Some(ObjectEntry::new(key, size))
            })
            .collect();
        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage { entries, next })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> anyhow::Result<ObjectReader> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed downloading {:?} from {}", key, &self.bucket))?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket))]
    async fn put(&self, key: &str, body: Body, content_type: &str) -> anyhow::Result<()> {
        let stream = match body {
            Body::File(path) => ByteStream::from_path(&path)
                .await
                .with_context(|| format!("failed opening {:?} for upload", &path))?,
            Body::Bytes(bytes) => ByteStream::from(bytes),
        };
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(stream)
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("failed uploading {:?} to {}", key, &self.bucket))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn head(&self) -> anyhow::Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| {
                format!("bucket {:?} does not exist or is not accessible", &self.bucket)
            })?;
        Ok(())
    }
}
