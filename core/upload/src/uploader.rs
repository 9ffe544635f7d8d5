//! Upload orchestration: one remote folder per run, one task per local file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use driveup_common::{FolderName, Result};
use driveup_storage::{RemoteFile, RemoteFolder, RemoteStorage};

use crate::retry::{RetryEvent, RetryExecutor, RetryPolicy};
use crate::summary::RunSummary;
use crate::task::{FailureKind, FileOutcome, FileTask, TaskState};
use crate::walker::{self, LocalFile, WalkOptions};

/// Configuration for the uploader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Retry policy applied to every file.
    pub retry: RetryPolicy,
    /// Directory walk options.
    pub walk: WalkOptions,
    /// Mirror local subdirectories as remote subfolders instead of
    /// uploading everything flat into the run folder.
    pub preserve_structure: bool,
    /// Remote folder that receives the run folder; Drive root when unset.
    pub parent_id: Option<String>,
}

impl UploaderConfig {
    /// Check the configuration.
    ///
    /// # Errors
    /// - `InvalidInput` if the retry policy is invalid or the parent id is blank
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;

        if let Some(parent) = &self.parent_id {
            if parent.trim().is_empty() {
                return Err(driveup_common::Error::InvalidInput(
                    "Parent folder id cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Uploads a directory tree into a fresh remote folder.
pub struct Uploader<S: RemoteStorage + ?Sized> {
    /// Remote backend.
    storage: Arc<S>,
    /// Retry executor.
    executor: RetryExecutor,
    /// Subfolders created so far, keyed by run folder id and relative path.
    folders: RwLock<HashMap<(String, PathBuf), RemoteFolder>>,
    /// Configuration.
    config: UploaderConfig,
}

impl<S: RemoteStorage + ?Sized> Uploader<S> {
    /// Create a new uploader.
    ///
    /// # Errors
    /// - `InvalidInput` if `config` does not validate
    pub fn new(storage: Arc<S>, config: UploaderConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            storage,
            executor: RetryExecutor::new(config.retry.clone()),
            folders: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Create the run folder.
    ///
    /// Not retried: a failure here ends the run.
    pub async fn create_folder(&self, name: &FolderName) -> Result<RemoteFolder> {
        let folder = self
            .storage
            .create_folder(name.as_str(), self.config.parent_id.as_deref())
            .await?;

        info!(
            "Folder created on {}: {} ({})",
            self.storage.name(),
            folder.name,
            folder.id
        );
        Ok(folder)
    }

    /// Upload every regular file under `root` into a new folder called `name`.
    ///
    /// Files are processed one at a time in walk order. A file that fails
    /// does not stop the run.
    ///
    /// # Errors
    /// - `InvalidInput` if `root` is not a directory
    /// - Any error from creating the run folder
    pub async fn run(&self, root: &Path, name: &FolderName) -> Result<RunSummary> {
        walker::ensure_directory(root)?;

        let started = Instant::now();
        let folder = self.create_folder(name).await?;

        let mut outcomes = Vec::new();
        for mut task in walker::list_local_files(root, &folder, &self.config.walk)? {
            let result = self.upload_one(&mut task).await;
            outcomes.push(FileOutcome {
                file: task.file().clone(),
                attempts: task.attempts(),
                result,
            });
        }

        let summary = RunSummary {
            folder,
            outcomes,
            elapsed: started.elapsed(),
        };
        summary.log();

        Ok(summary)
    }

    /// Drive one task to a terminal state.
    pub async fn upload_one(&self, task: &mut FileTask) -> std::result::Result<RemoteFile, FailureKind> {
        let file = task.file().clone();
        let root = task.folder().clone();
        let name = file.file_name();
        let relative = file.relative.display().to_string();

        let (file_ref, root_ref, name_ref) = (&file, &root, name.as_str());

        let outcome = self
            .executor
            .execute_observed(
                move || self.attempt(file_ref, root_ref, name_ref),
                |event| match event {
                    RetryEvent::Attempt { attempt } => {
                        if attempt == 1 {
                            info!("Uploading {}", relative);
                        } else {
                            info!("Uploading {} (attempt {})", relative, attempt);
                        }
                        task.advance(TaskState::Uploading);
                    }
                    RetryEvent::Backoff {
                        attempt,
                        error,
                        delay,
                    } => {
                        warn!(
                            "Attempt {} for {} failed: {}. Retrying in {:?}",
                            attempt, relative, error, delay
                        );
                        task.advance(TaskState::RetryWait);
                    }
                },
            )
            .await;

        match outcome.result {
            Ok(remote) => {
                task.advance(TaskState::Succeeded);
                info!("Uploaded {} (id: {})", relative, remote.id);
                Ok(remote)
            }
            Err(err) => {
                task.advance(TaskState::Failed);
                let kind = if outcome.exhausted {
                    FailureKind::Exhausted {
                        attempts: outcome.attempts,
                        reason: err.to_string(),
                    }
                } else {
                    FailureKind::Rejected {
                        reason: err.to_string(),
                    }
                };
                error!("Failed to upload {}: {}", relative, kind);
                Err(kind)
            }
        }
    }

    /// One attempt: resolve the destination folder, then transfer.
    async fn attempt(&self, file: &LocalFile, root: &RemoteFolder, name: &str) -> Result<RemoteFile> {
        let destination = self.destination(root, file.relative_dir()).await?;
        self.storage.upload_file(&file.path, name, &destination).await
    }

    /// Folder a file lands in, creating missing subfolders on the way.
    async fn destination(&self, root: &RemoteFolder, relative_dir: &Path) -> Result<RemoteFolder> {
        if !self.config.preserve_structure || relative_dir.as_os_str().is_empty() {
            return Ok(root.clone());
        }

        let mut current = root.clone();
        let mut prefix = PathBuf::new();

        for component in relative_dir.components() {
            prefix.push(component);
            let key = (root.id.clone(), prefix.clone());

            let cached = self.folders.read().await.get(&key).cloned();
            current = match cached {
                Some(folder) => folder,
                None => {
                    let name = component.as_os_str().to_string_lossy();
                    let folder = self.storage.create_folder(&name, Some(&current.id)).await?;
                    debug!("Created remote subfolder {}", prefix.display());
                    self.folders.write().await.insert(key, folder.clone());
                    folder
                }
            };
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use driveup_common::Error;
    use driveup_storage::{MemoryStorage, ScriptedFailure};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config() -> UploaderConfig {
        UploaderConfig {
            retry: RetryPolicy::new(3)
                .with_fixed_delay(Duration::from_millis(1))
                .with_jitter(false),
            ..Default::default()
        }
    }

    fn uploader(storage: &Arc<MemoryStorage>, config: UploaderConfig) -> Uploader<MemoryStorage> {
        Uploader::new(storage.clone(), config).unwrap()
    }

    fn name(secs: u32) -> FolderName {
        FolderName::new("backup", Local.with_ymd_and_hms(2024, 1, 2, 3, 4, secs).unwrap()).unwrap()
    }

    /// a.txt, b.txt and an empty c/.
    fn simple_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
        fs::create_dir(dir.path().join("c")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_uploads_every_file_once() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());

        let summary = uploader(&storage, config())
            .run(dir.path(), &name(0))
            .await
            .unwrap();

        assert_eq!(summary.total(), 2);
        assert!(summary.is_success());
        assert_eq!(summary.folder.name, "backup_02-01-2024_03-04-00");

        // only the run folder; the empty directory is never mirrored
        assert_eq!(storage.folders().len(), 1);
        assert_eq!(
            storage.files_in(&summary.folder.id),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );
        assert_eq!(
            storage.file_data(&summary.folder.id, "a.txt"),
            Some(b"alpha".to_vec())
        );
        assert_eq!(storage.attempts("a.txt"), 1);
        assert_eq!(storage.attempts("b.txt"), 1);
        assert!(summary.outcomes.iter().all(|o| o.attempts == 1));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_upload("a.txt", ScriptedFailure::Transient(2));

        let summary = uploader(&storage, config())
            .run(dir.path(), &name(0))
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(storage.attempts("a.txt"), 3);
        assert_eq!(summary.outcomes[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_file_does_not_stop_run() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_upload("a.txt", ScriptedFailure::AlwaysTransient);

        let summary = uploader(&storage, config())
            .run(dir.path(), &name(0))
            .await
            .unwrap();

        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(storage.attempts("a.txt"), 3);
        assert_eq!(storage.files_in(&summary.folder.id), vec!["b.txt".to_string()]);
        assert!(matches!(
            summary.outcomes[0].result,
            Err(FailureKind::Exhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_upload("b.txt", ScriptedFailure::Denied);

        let summary = uploader(&storage, config())
            .run(dir.path(), &name(0))
            .await
            .unwrap();

        assert_eq!(storage.attempts("b.txt"), 1);
        assert!(matches!(
            summary.outcomes[1].result,
            Err(FailureKind::Rejected { .. })
        ));
        assert_eq!(summary.outcomes[1].attempts, 1);
    }

    #[tokio::test]
    async fn test_folder_creation_failure_is_fatal() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_folders(ScriptedFailure::Transient(1));

        let result = uploader(&storage, config()).run(dir.path(), &name(0)).await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(storage.attempts("a.txt"), 0);
        assert!(storage.folders().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_root_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let result = uploader(&storage, config())
            .run(&dir.path().join("missing"), &name(0))
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(storage.folders().is_empty());
    }

    #[tokio::test]
    async fn test_flat_mode_ignores_subdirectories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("x/y")).unwrap();
        fs::write(dir.path().join("x/y/deep.txt"), b"d").unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let summary = uploader(&storage, config())
            .run(dir.path(), &name(0))
            .await
            .unwrap();

        assert_eq!(storage.folders().len(), 1);
        assert_eq!(storage.files_in(&summary.folder.id), vec!["deep.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_preserve_structure_mirrors_non_empty_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("x/y")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("x/one.txt"), b"1").unwrap();
        fs::write(dir.path().join("x/y/two.txt"), b"2").unwrap();
        fs::write(dir.path().join("top.txt"), b"t").unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let config = UploaderConfig {
            preserve_structure: true,
            ..config()
        };
        let summary = uploader(&storage, config)
            .run(dir.path(), &name(0))
            .await
            .unwrap();

        assert!(summary.is_success());

        let folders = storage.folders();
        let names: Vec<&str> = folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["backup_02-01-2024_03-04-00", "x", "y"]);

        let x = &folders[1];
        let y = &folders[2];
        assert_eq!(x.parent_id.as_deref(), Some(summary.folder.id.as_str()));
        assert_eq!(y.parent_id.as_deref(), Some(x.id.as_str()));

        assert_eq!(storage.files_in(&summary.folder.id), vec!["top.txt".to_string()]);
        assert_eq!(storage.files_in(&x.id), vec!["one.txt".to_string()]);
        assert_eq!(storage.files_in(&y.id), vec!["two.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_subfolder_failure_goes_through_retries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::write(dir.path().join("x/one.txt"), b"1").unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let uploader = uploader(
            &storage,
            UploaderConfig {
                preserve_structure: true,
                ..config()
            },
        );
        let folder = uploader.create_folder(&name(0)).await.unwrap();
        storage.fail_folders(ScriptedFailure::Transient(1));

        let mut tasks: Vec<FileTask> =
            walker::list_local_files(dir.path(), &folder, &WalkOptions::default())
                .unwrap()
                .collect();
        let result = uploader.upload_one(&mut tasks[0]).await;

        assert!(result.is_ok());
        assert_eq!(tasks[0].attempts(), 2);
        assert_eq!(tasks[0].state(), TaskState::Succeeded);
    }

    #[tokio::test]
    async fn test_parent_folder_is_used() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        let parent = storage.create_folder("Backups", None).await.unwrap();

        let summary = uploader(
            &storage,
            UploaderConfig {
                parent_id: Some(parent.id.clone()),
                ..config()
            },
        )
        .run(dir.path(), &name(0))
        .await
        .unwrap();

        assert_eq!(summary.folder.parent_id, Some(parent.id));
    }

    #[tokio::test]
    async fn test_runs_get_distinct_folders() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        let uploader = uploader(&storage, config());

        let first = uploader.run(dir.path(), &name(0)).await.unwrap();
        let second = uploader.run(dir.path(), &name(1)).await.unwrap();

        assert_ne!(first.folder.id, second.folder.id);
        assert_ne!(first.folder.name, second.folder.name);
        assert_eq!(storage.files_in(&second.folder.id).len(), 2);
    }

    #[tokio::test]
    async fn test_vanished_file_is_rejected() {
        let dir = simple_tree();
        let storage = Arc::new(MemoryStorage::new());
        let uploader = uploader(&storage, config());
        let folder = uploader.create_folder(&name(0)).await.unwrap();

        let mut tasks: Vec<FileTask> =
            walker::list_local_files(dir.path(), &folder, &WalkOptions::default())
                .unwrap()
                .collect();
        fs::remove_file(dir.path().join("a.txt")).unwrap();

        let result = uploader.upload_one(&mut tasks[0]).await;
        assert!(matches!(result, Err(FailureKind::Rejected { .. })));
        assert_eq!(tasks[0].state(), TaskState::Failed);
        assert_eq!(tasks[0].attempts(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let storage = Arc::new(MemoryStorage::new());

        let zero_attempts = UploaderConfig {
            retry: RetryPolicy::new(0),
            ..Default::default()
        };
        assert!(Uploader::new(storage.clone(), zero_attempts).is_err());

        let blank_parent = UploaderConfig {
            parent_id: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(Uploader::new(storage, blank_parent).is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: UploaderConfig =
            serde_json::from_str(r#"{"preserve_structure": true}"#).unwrap();
        assert!(config.preserve_structure);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.parent_id.is_none());
    }
}
