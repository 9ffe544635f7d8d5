//! Authenticated Google Drive session.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use driveup_common::Result;

use crate::provider::{RemoteFile, RemoteFolder, RemoteStorage};

use super::auth::TokenManager;
use super::client::{DriveClient, DriveFile};

/// Files above this size go through a resumable upload session.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 5 * 1024 * 1024;

/// Whether a file of `size` bytes needs a resumable upload.
fn needs_resumable(size: u64) -> bool {
    size > SIMPLE_UPLOAD_LIMIT
}

/// An authenticated handle to Google Drive.
///
/// Constructed once by the [`Authenticator`](super::Authenticator) and
/// shared by reference for the rest of the run.
pub struct DriveSession {
    client: DriveClient,
}

impl DriveSession {
    /// Create a session around a token manager.
    pub fn new(token_manager: Arc<TokenManager>, request_timeout: Duration) -> Result<Self> {
        let client = DriveClient::new(token_manager, request_timeout)?;

        Ok(Self { client })
    }

    fn to_remote_file(file: DriveFile) -> RemoteFile {
        RemoteFile {
            size: file.size_bytes(),
            id: file.id,
            name: file.name,
        }
    }
}

#[async_trait]
impl RemoteStorage for DriveSession {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteFolder> {
        let folder = self.client.create_folder(name, parent_id).await?;

        Ok(RemoteFolder {
            id: folder.id,
            name: folder.name,
            parent_id: parent_id.map(str::to_string),
        })
    }

    async fn upload_file(
        &self,
        source: &Path,
        name: &str,
        folder: &RemoteFolder,
    ) -> Result<RemoteFile> {
        let size = tokio::fs::metadata(source).await?.len();

        let file = if needs_resumable(size) {
            debug!("Resumable upload of {} ({} bytes)", source.display(), size);
            self.client
                .upload_resumable(name, &folder.id, source, size)
                .await?
        } else {
            let data = tokio::fs::read(source).await?;
            self.client.upload_simple(name, &folder.id, data).await?
        };

        Ok(Self::to_remote_file(file))
    }
}
