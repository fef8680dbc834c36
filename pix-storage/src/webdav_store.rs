use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::{
    collect_stream, parent_segments, validate_identifier, BlobReader, ByteStream, ProviderKind,
    StorageCtx, StorageError, StorageProvider, StorageResult,
};

/// Connection settings for a WebDAV server
#[derive(Clone)]
pub struct WebDavConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub root_path: String,
}

impl std::fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("root_path", &self.root_path)
            .finish_non_exhaustive()
    }
}

/// WebDAV provider over plain HTTP verbs.
///
/// Parent collections are created with `MKCOL` before each `PUT`; servers
/// answer 405 or 409 for collections that already exist and both count as
/// success.
#[derive(Clone)]
pub struct WebDavProvider {
    name: String,
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl WebDavProvider {
    pub fn new<S: Into<String>>(name: S, config: WebDavConfig) -> StorageResult<Self> {
        let name = name.into();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| StorageError::config(format!("webdav client for {name}: {e}")))?;

        Ok(Self {
            name,
            client,
            base_url: Self::base_url(&config.url, &config.root_path),
            username: config.username,
            password: config.password,
        })
    }

    /// `url` + `root_path`, with no trailing slash
    fn base_url(url: &str, root_path: &str) -> String {
        let url = url.trim_end_matches('/');
        let root = root_path.trim_matches('/');
        if root.is_empty() {
            url.to_string()
        } else {
            format!("{url}/{root}")
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, ctx: &StorageCtx, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, url);
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        if let Some(remaining) = ctx.remaining() {
            builder = builder.timeout(remaining);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> StorageResult<reqwest::Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                StorageError::Timeout
            } else if e.is_connect() {
                StorageError::unavailable(&self.name, e.to_string())
            } else {
                StorageError::backend(e)
            }
        })
    }

    /// Create each parent collection, outermost first
    async fn ensure_collections(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<()> {
        let mut path = String::new();
        for segment in parent_segments(identifier) {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);

            let url = format!("{}/", self.url_for(&path));
            let response = self
                .send(self.request(ctx, dav_method("MKCOL")?, &url))
                .await?;
            let status = response.status();
            if status.is_success()
                || status == StatusCode::METHOD_NOT_ALLOWED
                || status == StatusCode::CONFLICT
            {
                continue;
            }
            return Err(status_error(status, &path));
        }
        Ok(())
    }
}

/// Extension verb outside the `http` crate's constants
fn dav_method(name: &'static str) -> StorageResult<Method> {
    Method::from_bytes(name.as_bytes()).map_err(StorageError::backend)
}

fn status_error(status: StatusCode, what: &str) -> StorageError {
    StorageError::backend_msg(format!("webdav returned {status} for {what}"))
}

#[async_trait]
impl StorageProvider for WebDavProvider {
    #[instrument(skip(self, ctx, data), fields(provider = %self.name, request_id = %ctx.request_id))]
    async fn save(&self, ctx: &StorageCtx, identifier: &str, mut data: ByteStream) -> StorageResult<()> {
        let path = validate_identifier(identifier)?;

        ctx.run(async {
            let body = collect_stream(&mut data).await?;
            let size = body.len();

            self.ensure_collections(ctx, &path).await?;

            let response = self
                .send(self.request(ctx, Method::PUT, &self.url_for(&path)).body(body))
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status, &path));
            }

            debug!(path = %path, bytes = size, "Resource written");
            Ok(())
        })
        .await
    }

    async fn get(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<BlobReader> {
        let path = validate_identifier(identifier)?;

        ctx.run(async {
            let response = self
                .send(self.request(ctx, Method::GET, &self.url_for(&path)))
                .await?;
            match response.status() {
                StatusCode::NOT_FOUND => Err(StorageError::not_found(&path)),
                status if status.is_success() => {
                    let body = response.bytes().await.map_err(StorageError::backend)?;
                    Ok(Box::new(std::io::Cursor::new(body)) as BlobReader)
                }
                status => Err(status_error(status, &path)),
            }
        })
        .await
    }

    async fn delete(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<()> {
        let path = validate_identifier(identifier)?;

        ctx.run(async {
            let response = self
                .send(self.request(ctx, Method::DELETE, &self.url_for(&path)))
                .await?;
            match response.status() {
                StatusCode::NOT_FOUND => Err(StorageError::not_found(&path)),
                status if status.is_success() => Ok(()),
                status => Err(status_error(status, &path)),
            }
        })
        .await
    }

    async fn exists(&self, ctx: &StorageCtx, identifier: &str) -> StorageResult<bool> {
        let path = validate_identifier(identifier)?;

        ctx.run(async {
            let response = self
                .send(self.request(ctx, Method::HEAD, &self.url_for(&path)))
                .await?;
            match response.status() {
                StatusCode::NOT_FOUND => Ok(false),
                status if status.is_success() => Ok(true),
                status => Err(status_error(status, &path)),
            }
        })
        .await
    }

    async fn health(&self, ctx: &StorageCtx) -> StorageResult<()> {
        ctx.run(async {
            let url = format!("{}/", self.base_url);
            let response = self
                .send(self.request(ctx, dav_method("PROPFIND")?, &url).header("Depth", "0"))
                .await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(StorageError::unavailable(
                    &self.name,
                    format!("PROPFIND on root returned {status}"),
                ))
            }
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::WebDav
    }
}
