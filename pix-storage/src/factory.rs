use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    LocalProvider, ObjectStoreProvider, S3Config, StorageBackend, StorageConfig, StorageCtx,
    StorageProvider, StorageResult, WebDavConfig, WebDavProvider,
};

/// Turns a decoded config into a live provider.
///
/// The registry health-checks whatever comes back before admitting it.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn build(&self, ctx: &StorageCtx, config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>>;
}

/// Builds the provider variant matching the config's backend kind
#[derive(Debug, Clone, Default)]
pub struct DefaultProviderFactory;

#[async_trait]
impl ProviderFactory for DefaultProviderFactory {
    async fn build(&self, ctx: &StorageCtx, config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
        config.validate()?;

        let provider: Arc<dyn StorageProvider> = match &config.backend {
            StorageBackend::Local { local_path } => {
                Arc::new(LocalProvider::new(config.name.clone(), local_path.clone()).await?)
            }
            StorageBackend::ObjectStore {
                endpoint,
                access_key_id,
                secret_access_key,
                use_ssl,
                bucket_name,
                region,
            } => {
                let s3 = S3Config {
                    endpoint: endpoint.clone(),
                    access_key_id: access_key_id.clone(),
                    secret_access_key: secret_access_key.clone(),
                    use_ssl: *use_ssl,
                    bucket: bucket_name.clone(),
                    region: region.clone(),
                };
                Arc::new(ObjectStoreProvider::connect(config.name.clone(), s3, ctx).await?)
            }
            StorageBackend::WebDav {
                url,
                username,
                password,
                root_path,
            } => {
                let dav = WebDavConfig {
                    url: url.clone(),
                    username: username.clone(),
                    password: password.clone(),
                    root_path: root_path.clone(),
                };
                Arc::new(WebDavProvider::new(config.name.clone(), dav)?)
            }
        };

        Ok(provider)
    }
}
