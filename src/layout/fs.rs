//! Filesystem collaborator
//!
//! The layout model only talks to the disk through [`FileSystem`].

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::signal::CancellationToken;

/// Errors for filesystem operations
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Copy cancelled; partial copy left at {partial}")]
    Cancelled { partial: PathBuf },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> FsError + '_ {
    move |source| FsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Filesystem operations the layout model needs.
pub trait FileSystem: Send + Sync {
    fn ensure_directory_exists(&self, path: &Path) -> Result<(), FsError>;

    /// Recursively copy `from` into `to`, returning the number of files copied.
    fn copy_directory(
        &self,
        from: &Path,
        to: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FsError>;

    fn read_text_file(&self, path: &Path) -> Result<String, FsError>;

    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), FsError>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Immediate subdirectories, sorted by name.
    fn list_directories(&self, path: &Path) -> Result<Vec<PathBuf>, FsError>;

    /// Immediate regular files, sorted by name.
    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, FsError>;

    fn modified(&self, path: &Path) -> Option<DateTime<Utc>>;

    fn set_readonly(&self, path: &Path, readonly: bool) -> Result<(), FsError>;

    fn is_readonly(&self, path: &Path) -> Result<bool, FsError>;

    /// Remove a directory tree, including read-only files in it.
    fn remove_directory(&self, path: &Path) -> Result<(), FsError>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl StdFileSystem {
    fn list_entries(&self, path: &Path, want_dirs: bool) -> Result<Vec<PathBuf>, FsError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(path).map_err(io_err(path))? {
            let entry = entry.map_err(io_err(path))?;
            let entry_path = entry.path();
            // Follows symlinks so a linked template directory still lists
            let is_dir = entry_path.is_dir();
            if is_dir == want_dirs && (is_dir || entry_path.is_file()) {
                out.push(entry_path);
            }
        }
        out.sort();
        Ok(out)
    }
}

impl FileSystem for StdFileSystem {
    fn ensure_directory_exists(&self, path: &Path) -> Result<(), FsError> {
        fs::create_dir_all(path).map_err(io_err(path))
    }

    fn copy_directory(
        &self,
        from: &Path,
        to: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FsError> {
        fs::create_dir_all(to).map_err(io_err(to))?;
        let mut copied = 0u64;

        for entry in WalkDir::new(from)
            .min_depth(1)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            if cancel.is_cancelled() {
                warn!(partial = %to.display(), copied, "directory copy cancelled");
                return Err(FsError::Cancelled {
                    partial: to.to_path_buf(),
                });
            }

            let entry = entry?;
            let path = entry.path();
            let Ok(rel_path) = path.strip_prefix(from) else {
                continue;
            };
            let target = to.join(rel_path);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&target).map_err(io_err(&target))?;
            } else if file_type.is_symlink() && path.is_dir() {
                debug!(path = %path.display(), "skipping directory symlink");
            } else {
                fs::copy(path, &target).map_err(io_err(path))?;
                // Copies start writable even when the source was locked
                let mut perms = fs::metadata(&target).map_err(io_err(&target))?.permissions();
                if perms.readonly() {
                    #[allow(clippy::permissions_set_readonly_false)]
                    perms.set_readonly(false);
                    fs::set_permissions(&target, perms).map_err(io_err(&target))?;
                }
                copied += 1;
            }
        }

        Ok(copied)
    }

    fn read_text_file(&self, path: &Path) -> Result<String, FsError> {
        fs::read_to_string(path).map_err(io_err(path))
    }

    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), FsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::write(path, contents).map_err(io_err(path))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_directories(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        self.list_entries(path, true)
    }

    fn list_files(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        self.list_entries(path, false)
    }

    fn modified(&self, path: &Path) -> Option<DateTime<Utc>> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    fn set_readonly(&self, path: &Path, readonly: bool) -> Result<(), FsError> {
        let mut perms = fs::metadata(path).map_err(io_err(path))?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(readonly);
        fs::set_permissions(path, perms).map_err(io_err(path))
    }

    fn is_readonly(&self, path: &Path) -> Result<bool, FsError> {
        Ok(fs::metadata(path)
            .map_err(io_err(path))?
            .permissions()
            .readonly())
    }

    fn remove_directory(&self, path: &Path) -> Result<(), FsError> {
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry?;
            if entry.file_type().is_file() && self.is_readonly(entry.path())? {
                self.set_readonly(entry.path(), false)?;
            }
        }
        fs::remove_dir_all(path).map_err(io_err(path))
    }
}
