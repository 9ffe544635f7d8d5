//! Per-file upload tasks and their state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::error;

use driveup_storage::{RemoteFile, RemoteFolder};

use crate::walker::LocalFile;

/// Upload state of a single file.
///
/// `Pending -> Uploading -> {Succeeded, RetryWait -> Uploading, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Discovered, not yet attempted.
    Pending,
    /// An attempt is in flight.
    Uploading,
    /// Last attempt failed transiently; waiting before the next.
    RetryWait,
    /// Uploaded.
    Succeeded,
    /// Given up on.
    Failed,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Succeeded)
                | (Uploading, RetryWait)
                | (Uploading, Failed)
                | (RetryWait, Uploading)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Uploading => "uploading",
            TaskState::RetryWait => "retry-wait",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a file ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FailureKind {
    /// Every allowed attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
    /// A non-transient error ended the task without further attempts.
    #[error("{reason}")]
    Rejected { reason: String },
}

/// One file pending transfer into one remote folder.
#[derive(Debug, Clone)]
pub struct FileTask {
    file: LocalFile,
    folder: RemoteFolder,
    state: TaskState,
    attempts: u32,
}

impl FileTask {
    /// Create a pending task.
    pub fn new(file: LocalFile, folder: RemoteFolder) -> Self {
        Self {
            file,
            folder,
            state: TaskState::Pending,
            attempts: 0,
        }
    }

    /// Local file to upload.
    pub fn file(&self) -> &LocalFile {
        &self.file
    }

    /// Run folder the file goes into.
    pub fn folder(&self) -> &RemoteFolder {
        &self.folder
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns whether the transition happened. Terminal states never change.
    pub fn advance(&mut self, next: TaskState) -> bool {
        if !self.state.can_transition_to(next) {
            error!(
                "Ignoring invalid transition {} -> {} for {}",
                self.state,
                next,
                self.file.relative.display()
            );
            return false;
        }

        if next == TaskState::Uploading {
            self.attempts += 1;
        }
        self.state = next;
        true
    }
}

/// Terminal result of one file.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// The file.
    pub file: LocalFile,
    /// Attempts made.
    pub attempts: u32,
    /// Uploaded file or failure reason.
    pub result: Result<RemoteFile, FailureKind>,
}

impl FileOutcome {
    /// Whether the file was uploaded.
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}
