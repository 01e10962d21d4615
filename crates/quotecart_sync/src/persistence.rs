//! Local cart cache.
//!
//! Persistence is a cache for fast startup only. The remote stays the
//! source of truth: a cached cart carries the baseline it last agreed on
//! with the remote, and every decision is made against a fresh pull.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use quotecart_core::{decode_state, encode_state, CartState};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A store for the last committed cart of a session.
///
/// # Implementors
///
/// - [`MemoryPersistence`] - For testing
/// - [`FilePersistence`] - A single file on disk
pub trait CartPersistence: Send + Sync {
    /// Loads the cached cart, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache exists but cannot be read or decoded.
    fn load(&self) -> SyncResult<Option<CartState>>;

    /// Replaces the cached cart.
    fn save(&self, state: &CartState) -> SyncResult<()>;

    /// Removes the cached cart.
    fn clear(&self) -> SyncResult<()>;
}

/// Keeps the encoded cart in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryPersistence {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a cart is cached.
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_none()
    }
}

impl CartPersistence for MemoryPersistence {
    fn load(&self) -> SyncResult<Option<CartState>> {
        match self.bytes.lock().as_deref() {
            None => Ok(None),
            Some(bytes) => Ok(Some(decode_state(bytes)?)),
        }
    }

    fn save(&self, state: &CartState) -> SyncResult<()> {
        let bytes = encode_state(state)?;
        *self.bytes.lock() = Some(bytes);
        Ok(())
    }

    fn clear(&self) -> SyncResult<()> {
        *self.bytes.lock() = None;
        Ok(())
    }
}

/// Keeps the encoded cart in a single file.
///
/// Saves write a sibling temporary file, sync it and rename it over the
/// target, so a crash leaves either the old or the new cart. Saves through
/// clones of one `FilePersistence` are serialized.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FilePersistence {
    /// Creates a cache at `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CartPersistence for FilePersistence {
    fn load(&self) -> SyncResult<Option<CartState>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&self.path, e)),
        };
        Ok(Some(decode_state(&bytes)?))
    }

    fn save(&self, state: &CartState) -> SyncResult<()> {
        let bytes = encode_state(state)?;
        let _write = self.write_lock.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|e| io_error(&temp, e))?;
        file.write_all(&bytes).map_err(|e| io_error(&temp, e))?;
        file.sync_all().map_err(|e| io_error(&temp, e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| io_error(&self.path, e))
    }

    fn clear(&self) -> SyncResult<()> {
        let _write = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }
}

fn io_error(path: &Path, error: std::io::Error) -> SyncError {
    SyncError::persistence(format!("{}: {error}", path.display()))
}
