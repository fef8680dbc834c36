use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};
use tracing::{debug, info, instrument};

use crate::{
    collect_stream, validate_identifier, BlobReader, ByteStream, ProviderKind, StorageCtx,
    StorageError, StorageProvider, StorageResult,
};

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible object store
#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub use_ssl: bool,
    pub bucket: String,
    pub region: Option<String>,
}

impl S3Config {
    /// Endpoint URL with a scheme, honoring `use_ssl` when none was given
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, self.endpoint.trim_end_matches('/'))
        }
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("use_ssl", &self.use_ssl)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Object-store provider over the AWS SDK (MinIO, RustFS, R2, S3 ...).
///
/// Keys are flat; "directories" are just prefixes. Each write is a single
/// `PutObject`, so an object is either fully present or absent.
#[derive(Clone)]
pub struct ObjectStoreProvider {
    name: String,
    client: Client,
    bucket: String,
}

impl ObjectStoreProvider {
    /// Build the client without any network traffic
    pub fn new<S: Into<String>>(name: S, config: S3Config) -> Self {
        let client = Self::create_client(&config);
        Self {
            name: name.into(),
            client,
            bucket: config.bucket,
        }
    }

    /// Build the client and make sure the bucket exists
    pub async fn connect<S: Into<String>>(name: S, config: S3Config, ctx: &StorageCtx) -> StorageResult<Self> {
        let provider = Self::new(name, config);
        provider.ensure_bucket(ctx).await?;
        Ok(provider)
    }

    fn create_client(config: &S3Config) -> Client {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "pixrs",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url())
            .force_path_style(true) // Required for MinIO-style endpoints
            .build();

        Client::from_conf(s3_config)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the bucket on first connect if it is missing
    #[instrument(skip(self, ctx), fields(provider = %self.name, bucket = %self.bucket))]
    pub async fn ensure_bucket(&self, ctx: &StorageCtx) -> StorageResult<()> {
        ctx.run(async {
            match self.client.head_bucket().bucket(&self.bucket).send().await {
                Ok(_) => return Ok(()),
                Err(err) if is_not_found(&err) => {}
                Err(err) => return Err(self.map_unavailable(err)),
            }

            info!("Bucket missing, creating it");
            match self.client.create_bucket().bucket(&self.bucket).send().await {
                Ok(_) => Ok(()),
                Err(err) => {
                    let already_there = err.as_service_error().map_or(false, |e| {
                        e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()
                    });
                    if already_there {
                        debug!("Bucket created concurrently");
                        Ok(())
                    } else {
                        Err(self.map_unavailable(err))
                    }
                }
            }
        })
        .await
    }

    fn map_unavailable<E>(&self, err: SdkError<E>) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::unavailable(&self.name, describe(&err))
    }

    /// HEAD the key: `Ok(true)` present, `Ok(false)` absent
    async fn head(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(map_aws_error(err)),
        }
    }
}

/// 404 on HEAD carries no body, so check the raw status as well
fn is_not_found<E>(err: &SdkError<E>) -> bool {
    err.raw_response()
        .map_or(false, |response| response.status().as_u16() == 404)
}

fn describe<E: std::error::Error>(err: &SdkError<E>) -> String {
    match err {
        SdkError::ServiceError(service) => service.err().to_string(),
        other => other.to_string(),
    }
}

fn map_aws_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::backend(err)
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    #[instrument(skip(self, ctx, data), fields(provider = %self.name, request_id = %ctx.request_id))]
    async fn save(&self, ctx: &StorageCtx, identifier: &str, mut data: ByteStream) -> StorageResult<()> {
        let key = validate_identifier(identifier)?;

        ctx.run(async {
            let body = collect_stream(&mut data).await?;
            let size = body.len();

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(AwsByteStream::from(body))
                .send()
                .await
                .map_err(map_aws_error)?;

            debug!(key = %key, bytes = size, "Object written");
            Ok(())
        })
        .await
    }

    async fn get(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<BlobReader> {
        let key = validate_identifier(identifier)?;

        ctx.run(async {
            let result = match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
            {
                Ok(result) => result,
                Err(err) => {
                    let missing = err.as_service_error().map_or(false, |e| e.is_no_such_key())
                        || is_not_found(&err);
                    return Err(if missing {
                        StorageError::not_found(&key)
                    } else {
                        map_aws_error(err)
                    });
                }
            };

            let body = result.body.collect().await.map_err(StorageError::backend)?;
            Ok(Box::new(std::io::Cursor::new(body.into_bytes())) as BlobReader)
        })
        .await
    }

    async fn delete(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<()> {
        let key = validate_identifier(identifier)?;

        ctx.run(async {
            // DeleteObject succeeds for absent keys; the contract wants a typed miss
            if !self.head(&key).await? {
                return Err(StorageError::not_found(&key));
            }

            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(map_aws_error)?;
            Ok(())
        })
        .await
    }

    async fn exists(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<bool> {
        let key = validate_identifier(identifier)?;
        ctx.run(self.head(&key)).await
    }

    async fn health(&self, ctx: &StorageCtx) -> StorageResult<()> {
        ctx.run(async {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|err| self.map_unavailable(err))?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ObjectStore
    }
}
