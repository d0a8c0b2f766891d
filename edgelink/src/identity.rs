//! Peer identity persistence.
//!
//! The controller reads and writes two identity strings through the
//! [`IdentityStore`] trait: the identity the signaling service assigned to
//! us and the identity of the device we dial. [`FileIdentityStore`] keeps
//! them in a small TOML file under the user config directory;
//! [`MemoryIdentityStore`] backs tests and ephemeral sessions.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Storage key for the identity assigned to us by the signaling service.
pub const LOCAL_PEER_ID: &str = "local_peer_id";

/// Storage key for the identity of the remote device.
pub const REMOTE_PEER_ID: &str = "remote_peer_id";

/// Errors from durable identity storage.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Failed to read the identity file.
    #[error("failed to read identity file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Failed to write the identity file.
    #[error("failed to write identity file {path}: {source}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The identity file is not valid TOML.
    #[error("failed to parse identity file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The identity map could not be serialized.
    #[error("failed to encode identity file: {0}")]
    EncodeToml(#[from] toml::ser::Error),
}

/// Durable key-value storage for peer identity strings.
pub trait IdentityStore: Send {
    /// Look up the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the backing storage cannot be
    /// written.
    fn put(&mut self, key: &str, value: &str) -> Result<(), IdentityError>;

    /// Remove the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the backing storage cannot be
    /// written.
    fn remove(&mut self, key: &str) -> Result<(), IdentityError>;
}

impl<T: IdentityStore + ?Sized> IdentityStore for Box<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        (**self).put(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), IdentityError> {
        (**self).remove(key)
    }
}

/// In-memory store. Clones share the same entries, which lets a test keep
/// an observing handle after moving a clone into the controller.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryIdentityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), IdentityError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// TOML-file-backed store.
///
/// The whole map is rewritten on every mutation; the file holds two short
/// strings, so that is cheaper than it sounds.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl FileIdentityStore {
    /// Open the store at `path`, loading any existing entries. A missing
    /// file is not an error; it is created on first write.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(IdentityError::ReadFile { path, source: e }),
        };
        Ok(Self { path, entries })
    }

    /// Default location: `<config dir>/edgelink/identity.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("edgelink").join("identity.toml"))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), IdentityError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IdentityError::WriteFile {
                path: self.path.clone(),
                source,
            })?;
        }
        let contents = toml::to_string(&self.entries)?;
        std::fs::write(&self.path, contents).map_err(|source| IdentityError::WriteFile {
            path: self.path.clone(),
            source,
        })
    }
}

impl IdentityStore for FileIdentityStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: &str) -> Result<(), IdentityError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), IdentityError> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}
