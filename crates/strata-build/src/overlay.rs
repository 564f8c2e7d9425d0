use std::path::{Path, PathBuf};

use strata_core::{Digest, DigestBuilder};
use walkdir::WalkDir;

/// One entry of a source tree, relative to its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File { executable: bool },
    Symlink,
    Dir,
}

/// A snapshot of the project tree: every entry, in sorted order, plus a
/// digest over paths, kinds and contents.
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub root: PathBuf,
    pub entries: Vec<SourceEntry>,
    pub digest: Digest,
}

impl SourceTree {
    /// Walk `root`, skipping the entries at the relative paths in `excludes`
    /// together with everything beneath them.
    ///
    /// Nothing else is filtered: hidden files, VCS metadata and build
    /// artifacts all become part of the tree. Sockets, FIFOs and device
    /// nodes have no content to copy and are skipped.
    pub fn scan(root: &Path, excludes: &[&Path]) -> Result<Self, OverlayError> {
        let mut entries = Vec::new();
        let mut digest = DigestBuilder::new("strata/source-tree/v1");

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                !e.path()
                    .strip_prefix(root)
                    .is_ok_and(|rel| excludes.iter().any(|ex| rel == *ex))
            });

        for entry in walker {
            let entry = entry.map_err(|e| OverlayError::Walk {
                path: root.to_path_buf(),
                source: e,
            })?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| OverlayError::OutsideRoot(entry.path().to_path_buf()))?
                .to_path_buf();
            let file_type = entry.file_type();

            let kind = if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path()).map_err(|e| OverlayError::Read {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
                digest
                    .str("symlink")
                    .str(&portable(&relative))
                    .str(&target.to_string_lossy());
                EntryKind::Symlink
            } else if file_type.is_dir() {
                digest.str("dir").str(&portable(&relative));
                EntryKind::Dir
            } else if file_type.is_file() {
                let content = std::fs::read(entry.path()).map_err(|e| OverlayError::Read {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
                let executable = is_executable(entry.path())?;
                digest
                    .str("file")
                    .str(&portable(&relative))
                    .str(if executable { "x" } else { "-" })
                    .field(&content);
                EntryKind::File { executable }
            } else {
                tracing::warn!(path = %entry.path().display(), "skipping special file");
                continue;
            };

            entries.push(SourceEntry {
                path: relative,
                kind,
            });
        }

        let digest = digest.finish();
        tracing::debug!(
            root = %root.display(),
            entries = entries.len(),
            %digest,
            "scanned source tree"
        );

        Ok(Self {
            root: root.to_path_buf(),
            entries,
            digest,
        })
    }

    /// Copy every entry of the tree under `dst`.
    pub fn copy_into(&self, dst: &Path) -> Result<(), OverlayError> {
        std::fs::create_dir_all(dst).map_err(|e| OverlayError::Create {
            path: dst.to_path_buf(),
            source: e,
        })?;
        for entry in &self.entries {
            copy_entry(&self.root.join(&entry.path), &dst.join(&entry.path), entry.kind)?;
        }
        Ok(())
    }
}

/// Recursively copy `src` to `dst`, preserving symlinks and permissions.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), OverlayError> {
    let tree = SourceTree::scan(src, &[])?;
    tree.copy_into(dst)
}

fn copy_entry(src: &Path, dst: &Path, kind: EntryKind) -> Result<(), OverlayError> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| OverlayError::Create {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    match kind {
        EntryKind::Dir => std::fs::create_dir_all(dst).map_err(|e| OverlayError::Create {
            path: dst.to_path_buf(),
            source: e,
        }),
        EntryKind::Symlink => copy_symlink(src, dst),
        EntryKind::File { .. } => {
            // Overlay semantics: a later layer replaces what an earlier one wrote.
            if dst.is_symlink() {
                std::fs::remove_file(dst).map_err(|e| OverlayError::CopyFile {
                    path: dst.to_path_buf(),
                    source: e,
                })?;
            }
            std::fs::copy(src, dst)
                .map(|_| ())
                .map_err(|e| OverlayError::CopyFile {
                    path: src.to_path_buf(),
                    source: e,
                })
        }
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), OverlayError> {
    let target = std::fs::read_link(src).map_err(|e| OverlayError::Read {
        path: src.to_path_buf(),
        source: e,
    })?;
    if dst.symlink_metadata().is_ok() {
        std::fs::remove_file(dst).map_err(|e| OverlayError::CopyFile {
            path: dst.to_path_buf(),
            source: e,
        })?;
    }
    std::os::unix::fs::symlink(&target, dst).map_err(|e| OverlayError::CopyFile {
        path: src.to_path_buf(),
        source: e,
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), OverlayError> {
    // Without unix symlinks, materialise the target's content.
    std::fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| OverlayError::CopyFile {
            path: src.to_path_buf(),
            source: e,
        })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> Result<bool, OverlayError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path).map_err(|e| OverlayError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> Result<bool, OverlayError> {
    Ok(false)
}

/// Relative path with `/` separators, so digests agree across platforms.
fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("failed to walk {path}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("entry {0} is outside the tree root")]
    OutsideRoot(PathBuf),
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to create directory {path}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to copy {path}")]
    CopyFile {
        path: PathBuf,
        source: std::io::Error,
    },
}
