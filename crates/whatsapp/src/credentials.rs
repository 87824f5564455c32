//! Persisted authentication material for the WhatsApp session.
//!
//! The content is opaque to rollcall: the sidecar hands us a map of named
//! entries (`creds`, pre-keys, sync keys, ...) and later deltas of that map.
//! A `null` value in a delta deletes the entry.

use std::{
    path::{Path, PathBuf},
    sync::Mutex as StdMutex,
};

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
    tokio::{fs, sync::Mutex},
    tracing::{debug, info},
};

use crate::Result;

pub type Credentials = Map<String, Value>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Credentials>;
    /// Merge `delta` into the stored credentials.
    async fn save(&self, delta: &Credentials) -> Result<()>;
    /// Forget everything; the next connection starts unpaired.
    async fn clear(&self) -> Result<()>;
}

pub fn merge(target: &mut Credentials, delta: &Credentials) {
    for (key, value) in delta {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Credentials kept as one JSON document in `<dir>/session.json`.
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("session.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Credentials> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Credentials::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Credentials::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, creds: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(creds)?).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credentials> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn save(&self, delta: &Credentials) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut creds = self.read().await?;
        merge(&mut creds, delta);
        self.write(&creds).await?;
        debug!(entries = creds.len(), changed = delta.len(), "saved session credentials");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "cleared session credentials");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Credentials held in memory only.
#[derive(Default)]
pub struct MemoryCredentialStore {
    creds: StdMutex<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Credentials {
        self.creds.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Credentials> {
        Ok(self.snapshot())
    }

    async fn save(&self, delta: &Credentials) -> Result<()> {
        let mut creds = self.creds.lock().unwrap_or_else(|e| e.into_inner());
        merge(&mut creds, delta);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.creds.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}
