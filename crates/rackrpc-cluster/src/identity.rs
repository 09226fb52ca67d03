//! Local state that outlives the process: the identity the region assigned
//! to this rack, and the secret shared with the region.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ClusterError, Result};

/// Persists the rack's region-assigned identity (its `system_id`).
#[async_trait]
pub trait IdentityStore: Send + Sync + 'static {
    /// The stored identity, or `None` when unset.
    async fn load(&self) -> Result<Option<String>>;

    async fn store(&self, identity: &str) -> Result<()>;
}

/// Stores the identity in a single file.
///
/// A missing or blank file counts as unset. Writes go to a temporary file in
/// the same directory which is then renamed over the old one.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

fn read_identity(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let identity = text.trim();
            Ok((!identity.is_empty()).then(|| identity.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn write_identity(path: &Path, identity: &str) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(identity.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<Option<String>> {
        let path = self.path.clone();
        Ok(tokio::task::spawn_blocking(move || read_identity(&path)).await??)
    }

    async fn store(&self, identity: &str) -> Result<()> {
        let path = self.path.clone();
        let identity = identity.to_string();
        Ok(tokio::task::spawn_blocking(move || write_identity(&path, &identity)).await??)
    }
}

/// Keeps the identity in memory.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new(identity: Option<String>) -> Self {
        Self {
            identity: Mutex::new(identity),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.identity.lock().clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.get())
    }

    async fn store(&self, identity: &str) -> Result<()> {
        *self.identity.lock() = Some(identity.to_string());
        Ok(())
    }
}

/// Source of the secret shared with the region.
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    async fn shared_secret(&self) -> Result<Vec<u8>>;
}

/// Reads a hex-encoded secret from a file on every use.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn shared_secret(&self) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let text = tokio::task::spawn_blocking(move || std::fs::read_to_string(&path)).await??;
        let secret = hex::decode(text.trim()).map_err(|e| {
            ClusterError::Config(format!(
                "shared secret in {} is not valid hex: {}",
                self.path.display(),
                e
            ))
        })?;
        if secret.is_empty() {
            return Err(ClusterError::Config(format!(
                "shared secret in {} is empty",
                self.path.display()
            )));
        }
        Ok(secret)
    }
}

/// A fixed secret.
#[derive(Clone)]
pub struct StaticSecretStore {
    secret: Vec<u8>,
}

impl StaticSecretStore {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for StaticSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSecretStore")
            .field("secret", &"*****")
            .finish()
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn shared_secret(&self) -> Result<Vec<u8>> {
        Ok(self.secret.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_identity_unset_when_missing_or_blank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system_id");
        let store = FileIdentityStore::new(&path);
        assert_eq!(store.load().await.unwrap(), None);

        std::fs::write(&path, " \n").unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_identity_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("system_id");
        let store = FileIdentityStore::new(&path);

        store.store("4y3h7n").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("4y3h7n"));

        store.store("8pqr2x").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "8pqr2x");
    }

    #[tokio::test]
    async fn test_memory_identity() {
        let store = MemoryIdentityStore::default();
        assert_eq!(store.load().await.unwrap(), None);
        store.store("abc").await.unwrap();
        assert_eq!(store.get().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_file_secret_trims_and_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "deadbeef\n").unwrap();
        let secret = FileSecretStore::new(&path).shared_secret().await.unwrap();
        assert_eq!(secret, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[tokio::test]
    async fn test_file_secret_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "not hex").unwrap();
        let err = FileSecretStore::new(&path).shared_secret().await.unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
    }

    #[tokio::test]
    async fn test_file_secret_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSecretStore::new(dir.path().join("absent"))
            .shared_secret()
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Io(_)));
    }

    #[test]
    fn test_static_secret_is_hidden() {
        let store = StaticSecretStore::new(b"hunter2".to_vec());
        assert!(!format!("{:?}", store).contains("hunter2"));
    }
}
