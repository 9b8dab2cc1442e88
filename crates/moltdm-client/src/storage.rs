//! Client-side persistence.
//!
//! The crypto core needs exactly get/set/delete over string-keyed opaque
//! byte blobs. The backend is a tagged variant selected at construction:
//! in-memory for tests and ephemeral agents, filesystem for durable
//! identities.

use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Errors from blob persistence
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("storage i/o on {path}: {source}")]
    Io {
        /// The file or directory involved
        path: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// String-keyed opaque blob store.
///
/// Writes are atomic per key (write-to-temp then rename on the filesystem
/// backend), which is what lets ratchet state be persisted inside the send
/// critical section without a torn-write window.
///
/// Keys use the alphabet `[A-Za-z0-9_/:.-]`; the filesystem backend maps
/// `/` and `:` to `_` when building file names.
#[derive(Clone)]
pub enum BlobStore {
    /// Process-local storage, lost on exit
    Memory(Arc<Mutex<HashMap<String, Vec<u8>>>>),
    /// One file per key under a directory
    Filesystem {
        /// Directory holding one file per key
        dir: PathBuf,
    },
}

impl BlobStore {
    /// Create an empty in-memory store.
    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    /// Open (creating if needed) a filesystem store rooted at `dir`.
    pub fn filesystem(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|source| StorageError::Io { path: dir.display().to_string(), source })?;
        Ok(Self::Filesystem { dir })
    }

    /// Fetch a blob. `None` if the key has never been set (or was deleted).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self {
            Self::Memory(map) => {
                let map = lock(map);
                Ok(map.get(key).cloned())
            },
            Self::Filesystem { dir } => {
                let path = dir.join(file_name(key));
                match std::fs::read(&path) {
                    Ok(bytes) => Ok(Some(bytes)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(source) => {
                        Err(StorageError::Io { path: path.display().to_string(), source })
                    },
                }
            },
        }
    }

    /// Store a blob, replacing any previous value.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        match self {
            Self::Memory(map) => {
                let mut map = lock(map);
                map.insert(key.to_string(), value.to_vec());
                Ok(())
            },
            Self::Filesystem { dir } => {
                let path = dir.join(file_name(key));
                let tmp = dir.join(format!("{}.tmp", file_name(key)));

                std::fs::write(&tmp, value)
                    .map_err(|source| StorageError::Io { path: tmp.display().to_string(), source })?;
                std::fs::rename(&tmp, &path)
                    .map_err(|source| StorageError::Io { path: path.display().to_string(), source })
            },
        }
    }

    /// Remove a blob. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self {
            Self::Memory(map) => {
                let mut map = lock(map);
                map.remove(key);
                Ok(())
            },
            Self::Filesystem { dir } => {
                let path = dir.join(file_name(key));
                match std::fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(source) => {
                        Err(StorageError::Io { path: path.display().to_string(), source })
                    },
                }
            },
        }
    }
}

#[allow(clippy::expect_used)]
fn lock(map: &Mutex<HashMap<String, Vec<u8>>>) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
    map.lock().expect("blob store mutex poisoned")
}

/// Map a store key to a flat file name.
fn file_name(key: &str) -> String {
    key.chars().map(|c| if c == '/' || c == ':' { '_' } else { c }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(store: &BlobStore) {
        assert!(store.get("sender/conv_1").unwrap().is_none());

        store.set("sender/conv_1", b"blob-one").unwrap();
        assert_eq!(store.get("sender/conv_1").unwrap().unwrap(), b"blob-one");

        store.set("sender/conv_1", b"blob-two").unwrap();
        assert_eq!(store.get("sender/conv_1").unwrap().unwrap(), b"blob-two");

        store.delete("sender/conv_1").unwrap();
        assert!(store.get("sender/conv_1").unwrap().is_none());

        // Deleting again is a no-op
        store.delete("sender/conv_1").unwrap();
    }

    #[test]
    fn memory_roundtrip() {
        roundtrip(&BlobStore::memory());
    }

    #[test]
    fn filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        roundtrip(&BlobStore::filesystem(dir.path()).unwrap());
    }

    #[test]
    fn filesystem_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = BlobStore::filesystem(dir.path()).unwrap();
        store.set("received/conv_1:moltbot_abc", b"state").unwrap();
        drop(store);

        let reopened = BlobStore::filesystem(dir.path()).unwrap();
        assert_eq!(reopened.get("received/conv_1:moltbot_abc").unwrap().unwrap(), b"state");
    }

    #[test]
    fn memory_clones_share_state() {
        let store = BlobStore::memory();
        let clone = store.clone();

        store.set("identity", b"me").unwrap();
        assert_eq!(clone.get("identity").unwrap().unwrap(), b"me");
    }
}
