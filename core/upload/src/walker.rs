//! Lazy recursive listing of the regular files under a local directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use driveup_common::{Error, Result};
use driveup_storage::RemoteFolder;

use crate::task::FileTask;

/// Options controlling the directory walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkOptions {
    /// Follow symbolic links. Off by default so nothing outside the tree is read.
    pub follow_links: bool,
}

/// A regular file found under the walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Path on disk.
    pub path: PathBuf,
    /// Path relative to the walk root.
    pub relative: PathBuf,
}

impl LocalFile {
    /// File name used for the remote copy.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative.to_string_lossy().into_owned())
    }

    /// Directory part of the relative path; empty for files at the root.
    pub fn relative_dir(&self) -> &Path {
        self.relative.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Iterator over the regular files of a tree.
///
/// Finite, lazy and single-pass: directories are read only as the iterator
/// advances. Directories, symlinks (unless followed) and special files are
/// never yielded, so a directory without files contributes nothing.
pub struct LocalFiles {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

impl LocalFiles {
    /// Start walking `root`.
    ///
    /// # Errors
    /// - `InvalidInput` if `root` does not exist or is not a directory
    pub fn open(root: &Path, options: &WalkOptions) -> Result<Self> {
        ensure_directory(root)?;

        let inner = WalkDir::new(root)
            .min_depth(1)
            .follow_links(options.follow_links)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root: root.to_path_buf(),
            inner,
        })
    }
}

impl Iterator for LocalFiles {
    type Item = LocalFile;

    fn next(&mut self) -> Option<LocalFile> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(entry.file_name()));

            return Some(LocalFile {
                path: entry.into_path(),
                relative,
            });
        }
    }
}

/// Check that `root` exists and is a directory.
pub fn ensure_directory(root: &Path) -> Result<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "The path '{}' is not a valid directory or doesn't exist",
            root.display()
        )))
    }
}

/// Whether the tree under `root` holds at least one regular file.
///
/// Stops at the first file found.
pub fn has_files(root: &Path, options: &WalkOptions) -> Result<bool> {
    Ok(LocalFiles::open(root, options)?.next().is_some())
}

/// Pending upload tasks for every regular file under `root`, all bound to `folder`.
pub fn list_local_files<'a>(
    root: &Path,
    folder: &'a RemoteFolder,
    options: &WalkOptions,
) -> Result<impl Iterator<Item = FileTask> + 'a> {
    Ok(LocalFiles::open(root, options)?.map(move |file| FileTask::new(file, folder.clone())))
}
