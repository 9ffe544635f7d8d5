//! In-memory storage backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use driveup_common::{Error, Result};

use crate::provider::{RemoteFile, RemoteFolder, RemoteStorage};

/// Failure to inject into an upload or folder creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Fail the next `n` attempts with a transient network error.
    Transient(u32),
    /// Fail every attempt with a transient network error.
    AlwaysTransient,
    /// Fail every attempt with a permission error.
    Denied,
}

impl ScriptedFailure {
    /// Consume one attempt; returns the error to report, if any.
    fn trigger(&mut self, what: &str) -> Option<Error> {
        match self {
            ScriptedFailure::Transient(0) => None,
            ScriptedFailure::Transient(n) => {
                *n -= 1;
                Some(Error::Network(format!("Injected failure for {}", what)))
            }
            ScriptedFailure::AlwaysTransient => {
                Some(Error::Network(format!("Injected failure for {}", what)))
            }
            ScriptedFailure::Denied => {
                Some(Error::PermissionDenied(format!("Injected denial for {}", what)))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    id: String,
    name: String,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    folders: Vec<RemoteFolder>,
    files: HashMap<String, Vec<StoredFile>>,
    attempts: HashMap<String, u32>,
    upload_failures: HashMap<String, ScriptedFailure>,
    folder_failure: Option<ScriptedFailure>,
}

/// In-memory storage backend.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Uploads and folder creations can be scripted to fail.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    /// Create a new empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make uploads of files named `name` fail as scripted.
    pub fn fail_upload(&self, name: impl Into<String>, failure: ScriptedFailure) {
        self.state().upload_failures.insert(name.into(), failure);
    }

    /// Make folder creations fail as scripted.
    pub fn fail_folders(&self, failure: ScriptedFailure) {
        self.state().folder_failure = Some(failure);
    }

    /// All folders created so far, in creation order.
    pub fn folders(&self) -> Vec<RemoteFolder> {
        self.state().folders.clone()
    }

    /// Sorted names of the files stored in a folder.
    pub fn files_in(&self, folder_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .files
            .get(folder_id)
            .map(|files| files.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Content of a stored file.
    pub fn file_data(&self, folder_id: &str, name: &str) -> Option<Vec<u8>> {
        self.state()
            .files
            .get(folder_id)?
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.data.clone())
    }

    /// Number of upload attempts made for files named `name`.
    pub fn attempts(&self, name: &str) -> u32 {
        self.state().attempts.get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteFolder> {
        let mut state = self.state();

        if let Some(failure) = state.folder_failure.as_mut() {
            if let Some(err) = failure.trigger(name) {
                return Err(err);
            }
        }

        if let Some(parent) = parent_id {
            if !state.folders.iter().any(|f| f.id == parent) {
                return Err(Error::NotFound(format!("Parent folder not found: {}", parent)));
            }
        }

        let folder = RemoteFolder {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        };
        state.folders.push(folder.clone());

        Ok(folder)
    }

    async fn upload_file(
        &self,
        source: &Path,
        name: &str,
        folder: &RemoteFolder,
    ) -> Result<RemoteFile> {
        {
            let mut state = self.state();
            *state.attempts.entry(name.to_string()).or_insert(0) += 1;

            if let Some(failure) = state.upload_failures.get_mut(name) {
                if let Some(err) = failure.trigger(name) {
                    return Err(err);
                }
            }

            if !state.folders.iter().any(|f| f.id == folder.id) {
                return Err(Error::NotFound(format!("Folder not found: {}", folder.id)));
            }
        }

        let data = tokio::fs::read(source).await?;

        let stored = StoredFile {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            data,
        };
        let file = RemoteFile {
            id: stored.id.clone(),
            name: stored.name.clone(),
            size: Some(stored.data.len() as u64),
        };

        self.state()
            .files
            .entry(folder.id.clone())
            .or_default()
            .push(stored);

        Ok(file)
    }
}
