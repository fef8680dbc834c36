use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{StorageError, StorageResult};

/// Identifier of a storage configuration row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageConfigId(pub u64);

impl std::fmt::Display for StorageConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StorageConfigId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Backend kind, as named in the `type` field of a config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Local,
    ObjectStore,
    #[serde(rename = "webdav")]
    WebDav,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::ObjectStore => "object-store",
            ProviderKind::WebDav => "webdav",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific connection settings, decoded once from the `type` tag
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageBackend {
    #[serde(rename = "local")]
    Local { local_path: PathBuf },

    #[serde(rename = "object-store")]
    ObjectStore {
        endpoint: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        use_ssl: bool,
        bucket_name: String,
        #[serde(default)]
        region: Option<String>,
    },

    #[serde(rename = "webdav")]
    WebDav {
        url: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        root_path: String,
    },
}

impl StorageBackend {
    pub fn kind(&self) -> ProviderKind {
        match self {
            StorageBackend::Local { .. } => ProviderKind::Local,
            StorageBackend::ObjectStore { .. } => ProviderKind::ObjectStore,
            StorageBackend::WebDav { .. } => ProviderKind::WebDav,
        }
    }
}

// Secrets never reach logs through `{:?}`.
impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Local { local_path } => f
                .debug_struct("Local")
                .field("local_path", local_path)
                .finish(),
            StorageBackend::ObjectStore {
                endpoint,
                access_key_id,
                use_ssl,
                bucket_name,
                region,
                ..
            } => f
                .debug_struct("ObjectStore")
                .field("endpoint", endpoint)
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .field("use_ssl", use_ssl)
                .field("bucket_name", bucket_name)
                .field("region", region)
                .finish(),
            StorageBackend::WebDav {
                url,
                username,
                root_path,
                ..
            } => f
                .debug_struct("WebDav")
                .field("url", url)
                .field("username", username)
                .field("password", &"<redacted>")
                .field("root_path", root_path)
                .finish(),
        }
    }
}

/// One configured backend, as handed over by the (external) config store
/// after decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub id: StorageConfigId,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(flatten)]
    pub backend: StorageBackend,
}

fn default_enabled() -> bool {
    true
}

impl StorageConfig {
    pub fn new<S: Into<String>>(id: u64, name: S, backend: StorageBackend) -> Self {
        Self {
            id: StorageConfigId(id),
            name: name.into(),
            is_default: false,
            is_enabled: true,
            backend,
        }
    }

    pub fn local<S: Into<String>, P: Into<PathBuf>>(id: u64, name: S, local_path: P) -> Self {
        Self::new(
            id,
            name,
            StorageBackend::Local {
                local_path: local_path.into(),
            },
        )
    }

    /// Mark as the default backend
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.backend.kind()
    }

    /// Decode a config from its JSON form
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StorageError::config(format!("malformed storage config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_value(value: serde_json::Value) -> StorageResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| StorageError::config(format!("malformed storage config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields are present
    pub fn validate(&self) -> StorageResult<()> {
        if self.name.trim().is_empty() {
            return Err(StorageError::config(format!("config {} has an empty name", self.id)));
        }

        let missing = |field: &str| {
            StorageError::config(format!("config {} ({}) is missing {}", self.id, self.name, field))
        };

        match &self.backend {
            StorageBackend::Local { local_path } => {
                if local_path.as_os_str().is_empty() {
                    return Err(missing("local_path"));
                }
            }
            StorageBackend::ObjectStore {
                endpoint,
                access_key_id,
                secret_access_key,
                bucket_name,
                ..
            } => {
                if endpoint.is_empty() {
                    return Err(missing("endpoint"));
                }
                if access_key_id.is_empty() || secret_access_key.is_empty() {
                    return Err(missing("credentials"));
                }
                if bucket_name.is_empty() {
                    return Err(missing("bucket_name"));
                }
            }
            StorageBackend::WebDav { url, .. } => {
                if url.is_empty() {
                    return Err(missing("url"));
                }
            }
        }
        Ok(())
    }
}

/// Registry tuning
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Timeout for a single health probe
    pub health_timeout: Duration,

    /// How long a replaced provider stays open for in-flight operations
    pub retire_grace: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(5),
            retire_grace: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_retire_grace(mut self, grace: Duration) -> Self {
        self.retire_grace = grace;
        self
    }

    /// Defaults overridden by `PIXRS_HEALTH_TIMEOUT_SECS` / `PIXRS_RETIRE_GRACE_SECS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_secs("PIXRS_HEALTH_TIMEOUT_SECS") {
            config.health_timeout = secs;
        }
        if let Some(secs) = env_secs("PIXRS_RETIRE_GRACE_SECS") {
            config.retire_grace = secs;
        }
        config
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
