//! One durable key-value namespace backed by a JSON object file
//!
//! Every write reads the file, operates, and writes it back through a uniquely
//! named temp file + rename. The read-modify-write holds both the in-process
//! mutex and an exclusive advisory lock on `<name>.lock`, so separate handles
//! and separate processes sharing the directory serialize their writes.
//! Nothing is cached between operations. Atomicity is per write, never across
//! namespaces.

use fs4::fs_std::FileExt;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use super::StoreError;
use crate::constants::store::{CORRUPT_SUFFIX, LOCK_EXT, NAMESPACE_EXT};

pub(crate) type Entries = Map<String, Value>;

pub(crate) struct Namespace {
    name: &'static str,
    path: PathBuf,
    lock_path: PathBuf,
    lock: Mutex<()>,
}

impl Namespace {
    pub(crate) fn open(dir: &Path, name: &'static str) -> Self {
        Self {
            name,
            path: dir.join(format!("{name}.{NAMESPACE_EXT}")),
            lock_path: dir.join(format!("{name}.{LOCK_EXT}")),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        let _guard = self.acquire();
        self.load_or_empty().remove(key)
    }

    /// String value for `key`; non-string values count as absent
    pub(crate) fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            other => {
                warn!(namespace = self.name, key = %key, value = %other, "Expected string value");
                None
            }
        }
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let _guard = self.acquire();
        self.load_or_empty().keys().cloned().collect()
    }

    pub(crate) fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    /// Returns whether the key existed
    pub(crate) fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.update(|entries| entries.remove(key).is_some())
    }

    /// Drop every key, returning how many there were
    pub(crate) fn clear(&self) -> Result<usize, StoreError> {
        self.update(|entries| {
            let count = entries.len();
            entries.clear();
            count
        })
    }

    /// Read-modify-write of the whole namespace under its lock
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> Result<T, StoreError> {
        self.try_update(|entries| Ok(f(entries)))
    }

    /// Like [`update`](Self::update), but nothing is written when `f` fails
    pub(crate) fn try_update<T>(
        &self,
        f: impl FnOnce(&mut Entries) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.acquire();
        let _file_lock = self.lock_file()?;
        let mut entries = self.load()?;
        let out = f(&mut entries)?;
        self.save(&entries)?;
        Ok(out)
    }

    /// fsync the namespace file if it exists
    pub(crate) fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.acquire();
        if self.path.exists() {
            fs::File::open(&self.path)
                .and_then(|file| file.sync_all())
                .map_err(|source| StoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn acquire(&self) -> MutexGuard<'_, ()> {
        // A panic in another holder leaves no partial state behind: the file
        // is only ever replaced whole.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Exclusive advisory lock shared with every other handle on this
    /// directory; released when the returned file is dropped
    fn lock_file(&self) -> Result<fs::File, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.lock_path.clone(),
            source,
        };
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(io_err)?;
        FileExt::lock_exclusive(&file).map_err(io_err)?;
        Ok(file)
    }

    /// Current contents for a read; failures read as empty and are logged
    fn load_or_empty(&self) -> Entries {
        self.load().unwrap_or_else(|e| {
            error!(namespace = self.name, error = %e, "Failed to load namespace, reading as empty");
            Entries::new()
        })
    }

    /// Current contents of the file
    ///
    /// A missing file is empty. A file that isn't a UTF-8 JSON object is moved
    /// aside first. Any other read failure is an error, so a write never
    /// replaces a file it couldn't read.
    fn load(&self) -> Result<Entries, StoreError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        match serde_json::from_slice::<Entries>(&contents) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                error!(namespace = self.name, path = %self.path.display(), error = %e, "Namespace file is corrupt, starting empty");
                self.quarantine()?;
                Ok(Entries::new())
            }
        }
    }

    /// Move an unreadable file aside so the next write doesn't destroy it
    fn quarantine(&self) -> Result<(), StoreError> {
        let target = self.path.with_extension(format!("{NAMESPACE_EXT}.{CORRUPT_SUFFIX}"));
        match fs::rename(&self.path, &target) {
            Ok(()) => {
                warn!(namespace = self.name, backup = %target.display(), "Moved corrupt namespace file aside");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => {
                error!(namespace = self.name, error = %source, "Failed to move corrupt namespace file aside");
                Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    fn save(&self, entries: &Entries) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let payload = serde_json::to_vec_pretty(entries).map_err(|source| StoreError::Encode {
            namespace: self.name,
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&payload).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(namespace = self.name, keys = entries.len(), "Namespace written");
        Ok(())
    }
}
