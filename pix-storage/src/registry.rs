//! Live set of storage providers, keyed by config id and by name.
//!
//! Lookups take a short read lock and hand out a [`ProviderRef`], which owns
//! an `Arc` to the provider. Reloading a config builds and health-checks the
//! replacement outside the lock, then swaps the maps in one write; operations
//! already holding the old `ProviderRef` finish against the old provider,
//! which is closed after [`RegistryConfig::retire_grace`].

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    ConfigSource, ProviderFactory, ProviderKind, RegistryConfig, StorageConfig, StorageConfigId,
    StorageCtx, StorageError, StorageProvider, StorageResult,
};

/// A resolved provider plus the config identity it was built from
#[derive(Clone)]
pub struct ProviderRef {
    pub id: StorageConfigId,
    pub name: String,
    provider: Arc<dyn StorageProvider>,
}

impl ProviderRef {
    pub fn provider(&self) -> &Arc<dyn StorageProvider> {
        &self.provider
    }
}

impl Deref for ProviderRef {
    type Target = dyn StorageProvider;

    fn deref(&self) -> &Self::Target {
        self.provider.as_ref()
    }
}

impl std::fmt::Debug for ProviderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.provider.kind())
            .finish()
    }
}

/// Listing entry for an admitted provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: StorageConfigId,
    pub name: String,
    pub kind: ProviderKind,
    pub is_default: bool,
    pub admitted_at: DateTime<Utc>,
}

/// Result of probing one admitted provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub id: StorageConfigId,
    pub name: String,
    pub healthy: bool,
    pub error: Option<String>,
}

struct Entry {
    config: StorageConfig,
    provider: Arc<dyn StorageProvider>,
    admitted_at: DateTime<Utc>,
}

impl Entry {
    fn to_ref(&self) -> ProviderRef {
        ProviderRef {
            id: self.config.id,
            name: self.config.name.clone(),
            provider: self.provider.clone(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<StorageConfigId, Arc<Entry>>,
    by_name: HashMap<String, Arc<Entry>>,
    default_id: Option<StorageConfigId>,
}

impl RegistryState {
    fn insert(&mut self, entry: Arc<Entry>) -> Option<Arc<Entry>> {
        let previous = self.by_id.insert(entry.config.id, entry.clone());
        if let Some(previous) = &previous {
            self.by_name.remove(&previous.config.name);
        }
        self.by_name.insert(entry.config.name.clone(), entry);
        previous
    }

    fn remove(&mut self, id: StorageConfigId) -> Option<Arc<Entry>> {
        let entry = self.by_id.remove(&id)?;
        self.by_name.remove(&entry.config.name);
        Some(entry)
    }
}

struct Retirement {
    provider: Arc<dyn StorageProvider>,
    handle: JoinHandle<()>,
}

/// Registry of storage providers with hot reload
pub struct StorageRegistry {
    state: RwLock<RegistryState>,
    factory: Arc<dyn ProviderFactory>,
    source: Arc<dyn ConfigSource>,
    config: RegistryConfig,
    retiring: Mutex<Vec<Retirement>>,
    // Serializes load/reload/remove so two writers never interleave build and swap
    writer: tokio::sync::Mutex<()>,
}

impl StorageRegistry {
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        source: Arc<dyn ConfigSource>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            factory,
            source,
            config,
            retiring: Mutex::new(Vec::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Read every config from the source and load them
    pub async fn load_from_source(&self) -> StorageResult<usize> {
        let configs = self.source.load_all().await?;
        self.load(configs).await
    }

    /// Replace the whole provider set with `configs`.
    ///
    /// Disabled configs are skipped. A config whose provider fails to build
    /// or fails its health probe is skipped with a warning. If nothing is
    /// admitted the current set is left untouched and `NoProvidersAdmitted`
    /// is returned. Returns the number of admitted providers.
    #[instrument(skip(self, configs), fields(configs = configs.len()))]
    pub async fn load(&self, configs: Vec<StorageConfig>) -> StorageResult<usize> {
        let _writer = self.writer.lock().await;

        let mut candidates: Vec<StorageConfig> = Vec::new();
        for config in configs {
            if !config.is_enabled {
                debug!(id = %config.id, name = %config.name, "Skipping disabled storage config");
                continue;
            }
            if candidates.iter().any(|c| c.id == config.id || c.name == config.name) {
                warn!(id = %config.id, name = %config.name, "Skipping storage config with duplicate id or name");
                continue;
            }
            candidates.push(config);
        }
        let attempted = candidates.len();

        let results = join_all(candidates.into_iter().map(|config| self.admit(config))).await;
        let admitted: Vec<Arc<Entry>> = results.into_iter().flatten().collect();

        if admitted.is_empty() {
            error!(attempted, "No storage provider could be admitted");
            return Err(StorageError::NoProvidersAdmitted { attempted });
        }

        let default_id = choose_default(&admitted);

        let mut next = RegistryState::default();
        for entry in &admitted {
            next.insert(entry.clone());
        }
        next.default_id = Some(default_id);

        let previous = std::mem::replace(&mut *self.state.write(), next);
        for entry in previous.by_id.into_values() {
            self.retire(entry);
        }

        info!(
            admitted = admitted.len(),
            attempted,
            default = %default_id,
            "Storage providers loaded"
        );
        Ok(admitted.len())
    }

    /// Re-read one config from the source and swap its provider.
    ///
    /// The replacement is built and health-checked before the swap; on any
    /// failure the previous provider stays active and the error is returned.
    /// A config that is now disabled is removed instead.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn reload(&self, id: StorageConfigId) -> StorageResult<()> {
        let _writer = self.writer.lock().await;

        let config = self.source.load(id).await?;
        if !config.is_enabled {
            info!(name = %config.name, "Storage config disabled, removing provider");
            return match self.remove_locked(id) {
                Ok(()) => Ok(()),
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(err),
            };
        }

        let name = config.name.clone();
        let entry = self
            .admit(config)
            .await
            .ok_or_else(|| StorageError::unavailable(name, "replacement provider failed admission"))?;

        let replaced = {
            let mut state = self.state.write();
            if let Some(other) = state.by_name.get(&entry.config.name) {
                if other.config.id != id {
                    return Err(StorageError::config(format!(
                        "name {:?} already belongs to config {}",
                        entry.config.name, other.config.id
                    )));
                }
            }

            let becomes_default = entry.config.is_default || state.default_id.is_none();
            let replaced = state.insert(entry.clone());
            if becomes_default {
                state.default_id = Some(id);
            }
            replaced
        };

        if let Some(old) = replaced {
            self.retire(old);
        }

        info!(name = %entry.config.name, kind = %entry.config.kind(), "Storage provider reloaded");
        Ok(())
    }

    /// Resolve a provider by config id
    pub fn get_by_id(&self, id: StorageConfigId) -> StorageResult<ProviderRef> {
        self.state
            .read()
            .by_id
            .get(&id)
            .map(|entry| entry.to_ref())
            .ok_or_else(|| StorageError::not_found(format!("storage provider {id}")))
    }

    /// Resolve a provider by name; the empty name means the default
    pub fn get_by_name(&self, name: &str) -> StorageResult<ProviderRef> {
        if name.is_empty() {
            return self.get_default();
        }
        self.state
            .read()
            .by_name
            .get(name)
            .map(|entry| entry.to_ref())
            .ok_or_else(|| StorageError::not_found(format!("storage provider {name:?}")))
    }

    pub fn get_default(&self) -> StorageResult<ProviderRef> {
        let state = self.state.read();
        state
            .default_id
            .and_then(|id| state.by_id.get(&id))
            .map(|entry| entry.to_ref())
            .ok_or_else(|| StorageError::not_found("default storage provider"))
    }

    pub fn default_id(&self) -> Option<StorageConfigId> {
        self.state.read().default_id
    }

    /// Make an admitted provider the default
    pub fn set_default(&self, id: StorageConfigId) -> StorageResult<()> {
        let mut state = self.state.write();
        if !state.by_id.contains_key(&id) {
            return Err(StorageError::not_found(format!("storage provider {id}")));
        }
        let previous = state.default_id.replace(id);
        info!(id = %id, previous = ?previous, "Default storage provider changed");
        Ok(())
    }

    /// Remove a provider. The default cannot be removed; change the default first.
    pub async fn remove_provider(&self, id: StorageConfigId) -> StorageResult<()> {
        let _writer = self.writer.lock().await;
        self.remove_locked(id)
    }

    fn remove_locked(&self, id: StorageConfigId) -> StorageResult<()> {
        let removed = {
            let mut state = self.state.write();
            if state.default_id == Some(id) {
                return Err(StorageError::DefaultProviderRemoval { id });
            }
            state.remove(id)
        };

        match removed {
            Some(entry) => {
                info!(id = %id, name = %entry.config.name, "Storage provider removed");
                self.retire(entry);
                Ok(())
            }
            None => Err(StorageError::not_found(format!("storage provider {id}"))),
        }
    }

    /// Admitted providers, ordered by id
    pub fn list(&self) -> Vec<ProviderInfo> {
        let state = self.state.read();
        let mut infos: Vec<ProviderInfo> = state
            .by_id
            .values()
            .map(|entry| ProviderInfo {
                id: entry.config.id,
                name: entry.config.name.clone(),
                kind: entry.config.kind(),
                is_default: state.default_id == Some(entry.config.id),
                admitted_at: entry.admitted_at,
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }

    /// Probe every admitted provider concurrently
    pub async fn health_report(&self, ctx: &StorageCtx) -> Vec<ProviderHealth> {
        let entries: Vec<Arc<Entry>> = {
            let state = self.state.read();
            let mut entries: Vec<Arc<Entry>> = state.by_id.values().cloned().collect();
            entries.sort_by_key(|entry| entry.config.id);
            entries
        };

        let probes = entries.iter().map(|entry| async move {
            let probe_ctx = ctx.child().with_timeout(self.config.health_timeout);
            let result = entry.provider.health(&probe_ctx).await;
            ProviderHealth {
                id: entry.config.id,
                name: entry.config.name.clone(),
                healthy: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });

        join_all(probes).await
    }

    /// Close every provider, live and retiring. The registry is empty afterwards.
    pub async fn shutdown(&self) {
        let _writer = self.writer.lock().await;

        let retiring: Vec<Retirement> = std::mem::take(&mut *self.retiring.lock());
        for retirement in retiring {
            if !retirement.handle.is_finished() {
                retirement.handle.abort();
                retirement.provider.close().await;
            }
        }

        let live = std::mem::take(&mut *self.state.write());
        for entry in live.by_id.into_values() {
            entry.provider.close().await;
        }
        info!("Storage registry shut down");
    }

    /// Build and health-check a provider; `None` (after logging) on failure
    async fn admit(&self, config: StorageConfig) -> Option<Arc<Entry>> {
        let ctx = StorageCtx::new().with_timeout(self.config.health_timeout);

        let outcome: StorageResult<Arc<dyn StorageProvider>> = ctx
            .run(async {
                let provider = self.factory.build(&ctx, &config).await?;
                provider.health(&ctx).await?;
                Ok(provider)
            })
            .await;

        match outcome {
            Ok(provider) => {
                debug!(id = %config.id, name = %config.name, kind = %config.kind(), "Storage provider admitted");
                Some(Arc::new(Entry {
                    config,
                    provider,
                    admitted_at: Utc::now(),
                }))
            }
            Err(err) => {
                warn!(
                    id = %config.id,
                    name = %config.name,
                    kind = %config.kind(),
                    error = %err,
                    "Storage provider failed admission, skipping"
                );
                None
            }
        }
    }

    /// Close `entry`'s provider once the grace period has passed
    fn retire(&self, entry: Arc<Entry>) {
        let provider = entry.provider.clone();
        let grace = self.config.retire_grace;
        let name = entry.config.name.clone();

        let mut retiring = self.retiring.lock();
        retiring.retain(|r| !r.handle.is_finished());

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let closing = provider.clone();
                let handle = runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    closing.close().await;
                    debug!(name = %name, "Retired storage provider closed");
                });
                retiring.push(Retirement { provider, handle });
            }
            Err(_) => {
                debug!(name = %name, "No runtime to close retired provider, dropping it");
            }
        }
    }
}

fn choose_default(admitted: &[Arc<Entry>]) -> StorageConfigId {
    let mut defaults = admitted.iter().filter(|entry| entry.config.is_default);
    match defaults.next() {
        Some(first) => {
            if defaults.next().is_some() {
                warn!(chosen = %first.config.id, "Several storage configs marked default, using the first");
            }
            first.config.id
        }
        None => {
            let first = admitted[0].config.id;
            warn!(chosen = %first, "No admitted storage config is marked default, using the first");
            first
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bytes_stream, BlobReader, ByteStream, MemoryConfigSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Provider whose health and `save` behavior the test controls
    struct FakeProvider {
        name: String,
        healthy: bool,
        gate: Option<Arc<Notify>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StorageProvider for FakeProvider {
        async fn save(&self, _ctx: &StorageCtx, _identifier: &str, _data: ByteStream) -> StorageResult<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(())
        }

        async fn get(&self, _ctx: &StorageCtx, identifier: &str) -> StorageResult<BlobReader> {
            Err(StorageError::not_found(identifier))
        }

        async fn delete(&self, _ctx: &StorageCtx, identifier: &str) -> StorageResult<()> {
            Err(StorageError::not_found(identifier))
        }

        async fn exists(&self, _ctx: &StorageCtx, _identifier: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn health(&self, _ctx: &StorageCtx) -> StorageResult<()> {
            if self.healthy {
                Ok(())
            } else {
                Err(StorageError::unavailable(&self.name, "down"))
            }
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::Local
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Names containing "broken" fail their health probe; "slow" ones block `save` on the gate
    #[derive(Default)]
    struct FakeFactory {
        gate: Arc<Notify>,
        closed: Mutex<HashMap<String, Arc<AtomicBool>>>,
    }

    impl FakeFactory {
        fn closed_flag(&self, name: &str) -> Arc<AtomicBool> {
            self.closed.lock().entry(name.to_string()).or_default().clone()
        }
    }

    #[async_trait]
    impl ProviderFactory for FakeFactory {
        async fn build(&self, _ctx: &StorageCtx, config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
            let closed = Arc::new(AtomicBool::new(false));
            self.closed.lock().insert(config.name.clone(), closed.clone());
            Ok(Arc::new(FakeProvider {
                name: config.name.clone(),
                healthy: !config.name.contains("broken"),
                gate: config.name.contains("slow").then(|| self.gate.clone()),
                closed,
            }))
        }
    }

    fn registry_with(configs: Vec<StorageConfig>) -> (StorageRegistry, Arc<MemoryConfigSource>, Arc<FakeFactory>) {
        let source = Arc::new(MemoryConfigSource::new(configs));
        let factory = Arc::new(FakeFactory::default());
        let registry = StorageRegistry::new(
            factory.clone(),
            source.clone(),
            RegistryConfig::default().with_retire_grace(Duration::from_millis(100)),
        );
        (registry, source, factory)
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_load_skips_unhealthy_and_disabled() {
        let (registry, _, _) = registry_with(vec![
            StorageConfig::local(1, "disk", "/a"),
            StorageConfig::local(2, "broken-nas", "/b").as_default(),
            StorageConfig::local(3, "off", "/c").disabled(),
        ]);

        assert_eq!(registry.load_from_source().await.unwrap(), 1);
        assert!(registry.get_by_name("broken-nas").unwrap_err().is_not_found());
        assert!(registry.get_by_id(StorageConfigId(3)).is_err());
        // The configured default failed, so the first admitted one takes over
        assert_eq!(registry.default_id(), Some(StorageConfigId(1)));
        assert!(logs_contain("Storage provider failed admission, skipping"));
        assert!(logs_contain("No admitted storage config is marked default"));
    }

    #[tokio::test]
    async fn test_load_with_nothing_admitted_fails() {
        let (registry, _, _) = registry_with(vec![StorageConfig::local(1, "broken", "/a")]);
        let err = registry.load_from_source().await.unwrap_err();
        assert!(matches!(err, StorageError::NoProvidersAdmitted { attempted: 1 }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_resolves_default() {
        let (registry, _, _) = registry_with(vec![
            StorageConfig::local(1, "disk", "/a"),
            StorageConfig::local(2, "archive", "/b").as_default(),
        ]);
        registry.load_from_source().await.unwrap();

        assert_eq!(registry.get_by_name("").unwrap().id, StorageConfigId(2));
        assert_eq!(registry.get_by_name("disk").unwrap().name, "disk");

        registry.set_default(StorageConfigId(1)).unwrap();
        assert_eq!(registry.get_default().unwrap().id, StorageConfigId(1));
        assert!(registry.set_default(StorageConfigId(9)).is_err());
    }

    #[tokio::test]
    async fn test_default_cannot_be_removed() {
        let (registry, _, _) = registry_with(vec![
            StorageConfig::local(1, "disk", "/a").as_default(),
            StorageConfig::local(2, "archive", "/b"),
        ]);
        registry.load_from_source().await.unwrap();

        let err = registry.remove_provider(StorageConfigId(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::DefaultProviderRemoval { .. }));
        assert!(registry.get_by_id(StorageConfigId(1)).is_ok());

        registry.remove_provider(StorageConfigId(2)).await.unwrap();
        assert!(registry.get_by_name("archive").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_old_provider() {
        let (registry, source, _) = registry_with(vec![
            StorageConfig::local(1, "disk", "/a").as_default(),
            StorageConfig::local(2, "nas", "/b"),
        ]);
        registry.load_from_source().await.unwrap();

        source.upsert(StorageConfig::local(2, "broken-nas", "/b"));
        assert!(registry.reload(StorageConfigId(2)).await.is_err());

        let current = registry.get_by_id(StorageConfigId(2)).unwrap();
        assert_eq!(current.name, "nas");
        assert!(registry.get_by_name("broken-nas").is_err());
    }

    #[tokio::test]
    async fn test_reload_renames_and_disable_removes() {
        let (registry, source, _) = registry_with(vec![
            StorageConfig::local(1, "disk", "/a").as_default(),
            StorageConfig::local(2, "nas", "/b"),
        ]);
        registry.load_from_source().await.unwrap();

        source.upsert(StorageConfig::local(2, "nas-v2", "/b"));
        registry.reload(StorageConfigId(2)).await.unwrap();
        assert!(registry.get_by_name("nas").is_err());
        assert_eq!(registry.get_by_name("nas-v2").unwrap().id, StorageConfigId(2));

        source.upsert(StorageConfig::local(2, "nas-v2", "/b").disabled());
        registry.reload(StorageConfigId(2)).await.unwrap();
        assert!(registry.get_by_id(StorageConfigId(2)).is_err());
        assert!(registry.get_by_name("nas-v2").is_err());

        source.upsert(StorageConfig::local(1, "disk", "/a").as_default().disabled());
        let err = registry.reload(StorageConfigId(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::DefaultProviderRemoval { .. }));
    }

    #[tokio::test]
    async fn test_reload_does_not_break_in_flight_operation() {
        let (registry, source, factory) = registry_with(vec![
            StorageConfig::local(1, "slow-disk", "/a").as_default(),
        ]);
        let registry = Arc::new(registry);
        registry.load_from_source().await.unwrap();
        let old_closed = factory.closed_flag("slow-disk");

        let provider = registry.get_default().unwrap();
        let in_flight = tokio::spawn(async move {
            provider
                .save(&StorageCtx::new(), "ab/cd/x.png", bytes_stream(&b"data"[..]))
                .await
        });
        tokio::task::yield_now().await;

        source.upsert(StorageConfig::local(1, "disk-v2", "/a").as_default());
        registry.reload(StorageConfigId(1)).await.unwrap();
        assert_eq!(registry.get_default().unwrap().name, "disk-v2");

        // The old provider is still open for the operation that resolved it
        assert!(!old_closed.load(Ordering::SeqCst));
        factory.gate.notify_one();
        assert!(in_flight.await.unwrap().is_ok());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(old_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_list_and_health_report() {
        let (registry, _, _) = registry_with(vec![
            StorageConfig::local(2, "nas", "/b"),
            StorageConfig::local(1, "disk", "/a").as_default(),
        ]);
        registry.load_from_source().await.unwrap();

        let infos = registry.list();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, StorageConfigId(1));
        assert!(infos[0].is_default);
        assert!(!infos[1].is_default);

        let report = registry.health_report(&StorageCtx::new()).await;
        assert!(report.iter().all(|h| h.healthy));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (registry, _, factory) = registry_with(vec![StorageConfig::local(1, "disk", "/a")]);
        registry.load_from_source().await.unwrap();
        let closed = factory.closed_flag("disk");

        registry.shutdown().await;
        assert!(closed.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }
}
