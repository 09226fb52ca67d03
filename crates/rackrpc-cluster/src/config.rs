//! Rack controller configuration.
//!
//! The configuration is read through a [`ConfigStore`], which hands out a
//! fresh snapshot on every [`ConfigStore::open`]. The file store re-reads the
//! file each time, so edits take effect on the next poll pass.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{ClusterError, Result};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rackd/rackd.toml";

fn default_shared_secret_path() -> PathBuf {
    PathBuf::from("/var/lib/rackd/secret")
}

fn default_identity_path() -> PathBuf {
    PathBuf::from("/var/lib/rackd/system_id")
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_call_timeout_ms() -> u64 {
    120_000
}

fn default_discovery_timeout_ms() -> u64 {
    30_000
}

/// Settings shared by every component of the connection manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the region API, e.g. `http://[2001:db8::1]:5240/MAAS`
    pub url: Url,
    /// Legacy cluster identifier sent along with registration
    #[serde(default)]
    pub cluster_uuid: Option<String>,
    /// File holding the hex-encoded shared secret
    #[serde(default = "default_shared_secret_path")]
    pub shared_secret_path: PathBuf,
    /// File holding the identity the region assigned to this rack
    #[serde(default = "default_identity_path")]
    pub identity_path: PathBuf,
    /// Upgrade every connection to TLS after registering
    #[serde(default)]
    pub secure_upgrade: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

impl ClusterConfig {
    /// Creates a configuration with defaults for everything but the URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cluster_uuid: None,
            shared_secret_path: default_shared_secret_path(),
            identity_path: default_identity_path(),
            secure_upgrade: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }

    /// Parses a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: ClusterConfig =
            toml::from_str(text).map_err(|e| ClusterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.url.host_str().is_none() {
            return Err(ClusterError::Config(format!("url has no host: {}", self.url)));
        }
        match self.url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ClusterError::Config(format!(
                "unsupported url scheme '{}'",
                other
            ))),
        }
    }

    /// The discovery document URL: the base URL's path with `/rpc/` appended.
    ///
    /// ```
    /// # use rackrpc_cluster::config::ClusterConfig;
    /// let config = ClusterConfig::new("http://[::1]:5240/MAAS//".parse().unwrap());
    /// assert_eq!(config.rpc_info_url().as_str(), "http://[::1]:5240/MAAS/rpc/");
    /// ```
    pub fn rpc_info_url(&self) -> Url {
        let mut url = self.url.clone();
        let path = format!("{}/rpc/", self.url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

/// Scoped access to the configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync + 'static {
    /// Returns a snapshot of the current configuration.
    async fn open(&self) -> Result<ClusterConfig>;
}

/// Reads the configuration from a TOML file on every open.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn open(&self) -> Result<ClusterConfig> {
        let path = self.path.clone();
        let text = tokio::task::spawn_blocking(move || std::fs::read_to_string(&path))
            .await?
            .map_err(|e| {
                ClusterError::Config(format!("cannot read {}: {}", self.path.display(), e))
            })?;
        ClusterConfig::from_toml(&text)
    }
}

/// Holds a configuration in memory.
#[derive(Debug)]
pub struct StaticConfigStore {
    config: parking_lot::RwLock<ClusterConfig>,
}

impl StaticConfigStore {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config: parking_lot::RwLock::new(config),
        }
    }

    /// Replaces the configuration seen by later opens.
    pub fn set(&self, config: ClusterConfig) {
        *self.config.write() = config;
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn open(&self) -> Result<ClusterConfig> {
        Ok(self.config.read().clone())
    }
}
