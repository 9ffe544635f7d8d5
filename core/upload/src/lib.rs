//! Driveup upload engine
//!
//! Walks a local directory and copies every regular file into a freshly
//! created, timestamped remote folder:
//! - Lazy, sorted directory walk that yields regular files only
//! - Per-file task state machine
//! - Bounded retries with fixed or exponential backoff for transient errors
//! - Optional mirroring of the local directory layout
//! - End-of-run summary

pub mod retry;
pub mod summary;
pub mod task;
pub mod uploader;
pub mod walker;

// Re-export main types
pub use retry::{Attempted, Backoff, RetryEvent, RetryExecutor, RetryPolicy};
pub use summary::RunSummary;
pub use task::{FailureKind, FileOutcome, FileTask, TaskState};
pub use uploader::{Uploader, UploaderConfig};
pub use walker::{has_files, list_local_files, LocalFile, LocalFiles, WalkOptions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = UploaderConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.preserve_structure);
        let _walk = WalkOptions::default();
    }
}
