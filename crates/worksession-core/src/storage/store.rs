//! Byte-blob stores for the session snapshot.
//!
//! A store holds exactly one blob. `save` must be durable when it returns:
//! the controller only commits a transition in memory after `save` succeeds.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::database::Database;
use crate::error::PersistenceError;

/// Synchronous single-blob persistence.
pub trait SnapshotStore: Send {
    /// # Errors
    /// Returns an error if the blob could not be written durably.
    fn save(&mut self, blob: &[u8]) -> Result<(), PersistenceError>;

    /// # Errors
    /// Returns an error if a stored blob exists but cannot be read.
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Remove the blob. Clearing an empty store succeeds.
    ///
    /// # Errors
    /// Returns an error if an existing blob could not be removed.
    fn clear(&mut self) -> Result<(), PersistenceError>;
}

/// In-process store, for tests and embedders that persist elsewhere.
///
/// Clones share the same slot, so a test can keep a handle after giving the
/// store to a controller.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    inner: Arc<Mutex<MemorySlot>>,
}

#[derive(Debug, Default)]
struct MemorySlot {
    blob: Option<Vec<u8>>,
    fail_saves: bool,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a blob, as if left behind by a previous process.
    pub fn with_blob(blob: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        store.slot().blob = Some(blob.into());
        store
    }

    /// Make every subsequent `save` fail, simulating a full disk.
    pub fn fail_saves(&self, fail: bool) {
        self.slot().fail_saves = fail;
    }

    pub fn blob(&self) -> Option<Vec<u8>> {
        self.slot().blob.clone()
    }

    fn slot(&self) -> MutexGuard<'_, MemorySlot> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&mut self, blob: &[u8]) -> Result<(), PersistenceError> {
        let mut slot = self.slot();
        if slot.fail_saves {
            return Err(PersistenceError::Io {
                path: PathBuf::from("<memory>"),
                source: std::io::Error::new(ErrorKind::Other, "simulated write failure"),
            });
        }
        slot.blob = Some(blob.to_vec());
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.blob())
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.slot().blob = None;
        Ok(())
    }
}

/// Blob kept in a file, replaced atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&mut self, blob: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| self.io_err(e))?;
        file.write_all(blob).map_err(|e| self.io_err(e))?;
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

/// Blob kept under one key of the application database's `kv` table.
///
/// Several processes may open the same database. Writes are conditional on
/// the row still holding what this store last read or wrote, so a process
/// working from a stale snapshot gets [`PersistenceError::Conflict`] instead
/// of overwriting a newer one.
pub struct KvSnapshotStore {
    db: Database,
    key: String,
    seen: Mutex<Option<Vec<u8>>>,
}

impl KvSnapshotStore {
    pub const DEFAULT_KEY: &'static str = "work_session";

    pub fn new(db: Database) -> Self {
        Self::with_key(db, Self::DEFAULT_KEY)
    }

    pub fn with_key(db: Database, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
            seen: Mutex::new(None),
        }
    }

    fn seen(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn swap(&mut self, new: Option<&[u8]>) -> Result<(), PersistenceError> {
        let mut seen = self.seen();
        if !self.db.kv_swap_blob(&self.key, seen.as_deref(), new)? {
            return Err(PersistenceError::Conflict);
        }
        *seen = new.map(<[u8]>::to_vec);
        Ok(())
    }
}

impl SnapshotStore for KvSnapshotStore {
    fn save(&mut self, blob: &[u8]) -> Result<(), PersistenceError> {
        self.swap(Some(blob))
    }

    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        let blob = self.db.kv_get_blob(&self.key)?;
        *self.seen() = blob.clone();
        Ok(blob)
    }

    fn clear(&mut self) -> Result<(), PersistenceError> {
        self.swap(None)
    }
}
