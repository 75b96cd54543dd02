use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use crate::ObjectStore;
use crate::error::{StoreError, StoreResult};

/// Connection settings for an [`S3CompatibleStore`].
#[derive(Clone, Default)]
pub struct S3CompatibleStoreConfig {
    /// Name of the bucket all operations run against.
    pub bucket: String,
    /// Region to sign requests for.
    pub region: String,
    /// HTTP(S) endpoint of the service, e.g. `http://localhost:9000`.
    pub endpoint: String,
    /// Use path-style (`endpoint/bucket/key`) instead of virtual-host addressing.
    pub path_style: bool,
    /// Timeout for every single request.
    pub request_timeout: Option<Duration>,
    /// Access key ID.
    pub access_key: Option<String>,
    /// Secret access key.
    pub secret_key: Option<String>,
}

impl fmt::Debug for S3CompatibleStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3CompatibleStoreConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("path_style", &self.path_style)
            .field("request_timeout", &self.request_timeout)
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

/// An [`ObjectStore`] talking to an S3-compatible service.
pub struct S3CompatibleStore {
    bucket: Box<Bucket>,
}

impl S3CompatibleStore {
    /// Creates a new S3 compatible store bound to the given bucket.
    ///
    /// This does not perform any requests, so an unreachable endpoint is only detected by the
    /// first operation.
    pub fn new(config: S3CompatibleStoreConfig) -> StoreResult<Self> {
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )?;

        let region = Region::Custom {
            region: config.region,
            endpoint: config.endpoint,
        };

        let mut bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|cause| StoreError::s3("failed to configure bucket", cause))?;

        if config.path_style {
            bucket = bucket.with_path_style();
        }

        if let Some(request_timeout) = config.request_timeout {
            bucket = bucket
                .with_request_timeout(request_timeout)
                .map_err(|cause| StoreError::s3("failed to configure request timeout", cause))?;
        }

        Ok(Self { bucket })
    }
}

impl fmt::Debug for S3CompatibleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Compatible")
            .field("bucket", &self.bucket.name())
            .field("endpoint", &self.bucket.host())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3CompatibleStore {
    fn name(&self) -> &'static str {
        "s3-compatible"
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn put_object(&self, key: &str, payload: Bytes) -> StoreResult<()> {
        tracing::debug!(len = payload.len(), "Writing to s3_compatible store");
        self.bucket
            .put_object(key, &payload)
            .await
            .map_err(|cause| StoreError::s3(format!("failed to put `{key}`"), cause))?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        tracing::debug!("Reading from s3_compatible store");
        match self.bucket.get_object(key).await {
            Ok(response) => Ok(Bytes::from(response.to_vec())),
            Err(S3Error::HttpFailWithBody(404, _)) => {
                tracing::debug!("Object not found");
                Err(StoreError::NotFound { key: key.to_owned() })
            }
            Err(cause) => Err(StoreError::s3(format!("failed to get `{key}`"), cause)),
        }
    }

    #[tracing::instrument(level = "trace", fields(?prefix), skip_all)]
    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>> {
        tracing::debug!("Listing s3_compatible store");
        let pages = self
            .bucket
            .list(prefix.to_owned(), None)
            .await
            .map_err(|cause| StoreError::s3(format!("failed to list `{prefix}`"), cause))?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| object.key)
            .collect())
    }

    #[tracing::instrument(level = "trace", fields(?key), skip_all)]
    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        tracing::debug!("Deleting from s3_compatible store");
        self.bucket
            .delete_object(key)
            .await
            .map_err(|cause| StoreError::s3(format!("failed to delete `{key}`"), cause))?;
        Ok(())
    }
}
