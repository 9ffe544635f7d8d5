//! Remote storage trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use driveup_common::Result;

/// A folder in the remote storage hierarchy.
///
/// Created once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    /// Provider-assigned identifier.
    pub id: String,
    /// Display name of the folder.
    pub name: String,
    /// Identifier of the containing folder, if not at the storage root.
    pub parent_id: Option<String>,
}

/// A file stored remotely after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Provider-assigned identifier.
    pub id: String,
    /// File name inside its folder.
    pub name: String,
    /// Size in bytes, when reported by the provider.
    pub size: Option<u64>,
}

/// Remote storage operations needed by an upload run.
///
/// Implementations must handle their own authentication; callers hold one
/// value for the lifetime of the run and share it by reference.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Get the backend name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Create a folder.
    ///
    /// # Postconditions
    /// - A new folder named `name` exists under `parent_id` (or the root)
    ///
    /// # Errors
    /// - Permission denied
    /// - Network/authentication errors
    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteFolder>;

    /// Upload the local file at `source` into `folder` under `name`.
    ///
    /// # Preconditions
    /// - `source` is a readable regular file
    /// - `folder` was returned by [`RemoteStorage::create_folder`]
    ///
    /// # Errors
    /// - Local I/O errors reading `source`
    /// - Network/authentication errors
    async fn upload_file(
        &self,
        source: &Path,
        name: &str,
        folder: &RemoteFolder,
    ) -> Result<RemoteFile>;
}
