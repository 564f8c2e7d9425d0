//! Content-addressed layer store.
//!
//! ```text
//! <state_dir>/layers/
//!   <hex>/              committed snapshot, never modified
//!   <hex>.lock          per-key writer lock (fs2)
//!   .staging-<hex>-<pid>/  in-progress snapshot, removed unless committed
//! ```
//!
//! Each committed directory is a complete snapshot: the parent layer's
//! content with this step's changes applied on top. Readers never lock;
//! writers of the same key serialise on the key's lock file and the second
//! writer finds the layer already committed.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use strata_core::Digest;

use crate::overlay::{self, OverlayError};

pub struct LayerStore {
    root: PathBuf,
}

/// Result of acquiring a layer key.
pub enum Acquired {
    /// The layer is already committed.
    Cached(PathBuf),
    /// The layer must be built in the given staging directory.
    Fresh(Staging),
}

impl LayerStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            root: state_dir.join("layers"),
        }
    }

    /// Directory of a committed layer.
    pub fn path(&self, key: &Digest) -> PathBuf {
        self.root.join(key.hex())
    }

    pub fn contains(&self, key: &Digest) -> bool {
        self.path(key).is_dir()
    }

    /// Acquire `key` for building on top of `parent`.
    ///
    /// Blocks while another process holds the key. If the layer exists once
    /// the lock is held, it is reported cached; otherwise a staging directory
    /// seeded with a copy of `parent` is returned, still holding the lock.
    pub fn acquire(&self, key: &Digest, parent: Option<&Path>) -> Result<Acquired, LayerError> {
        if self.contains(key) {
            return Ok(Acquired::Cached(self.path(key)));
        }

        let lock = self.lock(key)?;

        if self.contains(key) {
            tracing::debug!(%key, "layer committed by a concurrent build");
            unlock(&lock, key);
            return Ok(Acquired::Cached(self.path(key)));
        }

        let staging = self
            .root
            .join(format!(".staging-{}-{}", key.hex(), std::process::id()));
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| LayerError::Cleanup {
                path: staging.clone(),
                source: e,
            })?;
        }

        let staging = Staging {
            path: staging,
            target: self.path(key),
            key: key.clone(),
            lock: Some(lock),
            committed: false,
        };

        match parent {
            Some(parent) => overlay::copy_tree(parent, &staging.path)?,
            None => std::fs::create_dir_all(&staging.path).map_err(|e| LayerError::Create {
                path: staging.path.clone(),
                source: e,
            })?,
        }

        Ok(Acquired::Fresh(staging))
    }

    /// Committed layer keys currently in the store.
    pub fn keys(&self) -> Result<Vec<Digest>, LayerError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let read = std::fs::read_dir(&self.root).map_err(|e| LayerError::Read {
            path: self.root.clone(),
            source: e,
        })?;

        let mut keys = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| LayerError::Read {
                path: self.root.clone(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.path().is_dir() {
                keys.push(Digest::new(&name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove every committed layer not listed in `keep`, then sweep what
    /// interrupted builds left behind: staging directories and lock files
    /// whose key no writer currently holds.
    pub fn prune(&self, keep: &[Digest]) -> Result<PruneReport, LayerError> {
        let mut report = PruneReport::default();

        for key in self.keys()? {
            if keep.contains(&key) {
                continue;
            }
            let lock = self.lock(&key)?;
            let path = self.path(&key);
            let result = std::fs::remove_dir_all(&path)
                .and_then(|()| std::fs::remove_file(self.lock_path(&key)))
                .map_err(|e| LayerError::Cleanup {
                    path: path.clone(),
                    source: e,
                });
            unlock(&lock, &key);
            result?;
            tracing::debug!(%key, "pruned layer");
            report.layers.push(key);
        }

        for entry in self.entries()? {
            let name = entry.to_string_lossy().into_owned();
            let (key, is_staging) = if let Some(rest) = name.strip_prefix(".staging-") {
                match rest.split_once('-') {
                    Some((hex, _pid)) => (Digest::new(hex), true),
                    None => continue,
                }
            } else if let Some(hex) = name.strip_suffix(".lock") {
                (Digest::new(hex), false)
            } else {
                continue;
            };
            let path = self.root.join(&name);
            if !is_staging && (self.contains(&key) || !path.exists()) {
                continue;
            }

            let Some(lock) = self.try_lock(&key)? else {
                tracing::debug!(%key, "key is being built, leaving it");
                continue;
            };
            let result = if is_staging {
                std::fs::remove_dir_all(&path).and_then(|()| {
                    if self.contains(&key) {
                        Ok(())
                    } else {
                        std::fs::remove_file(self.lock_path(&key))
                    }
                })
            } else {
                std::fs::remove_file(&path)
            }
            .map_err(|e| LayerError::Cleanup {
                path: path.clone(),
                source: e,
            });
            unlock(&lock, &key);
            result?;

            if is_staging {
                tracing::debug!(%key, "removed abandoned staging directory");
                report.staging += 1;
            } else {
                report.locks += 1;
            }
        }

        Ok(report)
    }

    fn entries(&self) -> Result<Vec<std::ffi::OsString>, LayerError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let read = std::fs::read_dir(&self.root).map_err(|e| LayerError::Read {
            path: self.root.clone(),
            source: e,
        })?;
        let mut names = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| LayerError::Read {
                path: self.root.clone(),
                source: e,
            })?;
            names.push(entry.file_name());
        }
        names.sort();
        Ok(names)
    }

    fn lock_path(&self, key: &Digest) -> PathBuf {
        self.root.join(format!("{}.lock", key.hex()))
    }

    /// Take the key's writer lock, blocking while another writer holds it.
    fn lock(&self, key: &Digest) -> Result<File, LayerError> {
        std::fs::create_dir_all(&self.root).map_err(|e| LayerError::Create {
            path: self.root.clone(),
            source: e,
        })?;
        let lock_path = self.lock_path(key);
        loop {
            let file = open_lock(&lock_path)?;
            file.lock_exclusive().map_err(|e| LayerError::Lock {
                path: lock_path.clone(),
                source: e,
            })?;
            // prune may have unlinked the file while we waited on it.
            if still_linked(&file, &lock_path) {
                return Ok(file);
            }
            unlock(&file, key);
        }
    }

    /// Take the key's writer lock only if nobody holds it.
    fn try_lock(&self, key: &Digest) -> Result<Option<File>, LayerError> {
        let lock_path = self.lock_path(key);
        let file = open_lock(&lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) if still_linked(&file, &lock_path) => Ok(Some(file)),
            Ok(()) => {
                unlock(&file, key);
                Ok(None)
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(LayerError::Lock {
                path: lock_path,
                source: e,
            }),
        }
    }
}

/// What [`LayerStore::prune`] removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub layers: Vec<Digest>,
    /// Staging directories left by interrupted builds
    pub staging: usize,
    /// Lock files of keys with no committed layer
    pub locks: usize,
}

fn open_lock(path: &Path) -> Result<File, LayerError> {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| LayerError::Lock {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    // arch-lint: allow(no-error-swallowing) reason="a lock file that cannot be inspected is treated as replaced"
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// An uncommitted layer. Dropping it without [`Staging::commit`] discards
/// everything written into it.
pub struct Staging {
    path: PathBuf,
    target: PathBuf,
    key: Digest,
    lock: Option<File>,
    committed: bool,
}

impl Staging {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically publish the staged snapshot under its key.
    pub fn commit(mut self) -> Result<PathBuf, LayerError> {
        std::fs::rename(&self.path, &self.target).map_err(|e| LayerError::Commit {
            path: self.target.clone(),
            source: e,
        })?;
        self.committed = true;
        tracing::debug!(key = %self.key, "committed layer");
        Ok(self.target.clone())
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed && self.path.exists() {
            tracing::debug!(key = %self.key, "discarding staged layer");
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to discard staged layer");
            }
        }
        if let Some(lock) = self.lock.take() {
            unlock(&lock, &self.key);
        }
    }
}

fn unlock(lock: &File, key: &Digest) {
    if let Err(e) = FileExt::unlock(lock) {
        tracing::warn!(%key, error = %e, "failed to release layer lock");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("failed to lock {path}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove {path}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to commit layer to {path}")]
    Commit {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}
