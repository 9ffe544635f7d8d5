//! Aggregated result of one backup run.

use std::time::Duration;
use tracing::{info, warn};

use driveup_storage::RemoteFolder;

use crate::task::FileOutcome;

/// What happened during a run, one outcome per file in walk order.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The timestamped folder created for this run.
    pub folder: RemoteFolder,
    /// Per-file outcomes.
    pub outcomes: Vec<FileOutcome>,
    /// Wall time spent uploading.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Number of files attempted.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Number of files uploaded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    /// Number of files given up on.
    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// Outcomes of the files that failed.
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// Whether every file was uploaded.
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Log the end-of-run summary.
    pub fn log(&self) {
        info!(
            "{}/{} file(s) uploaded successfully to '{}'",
            self.succeeded(),
            self.total(),
            self.folder.name
        );

        if !self.is_success() {
            warn!("{} file(s) failed to upload", self.failed());
            for outcome in self.failures() {
                if let Err(kind) = &outcome.result {
                    warn!("  {}: {}", outcome.file.relative.display(), kind);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FailureKind;
    use crate::walker::LocalFile;
    use driveup_storage::RemoteFile;
    use std::path::PathBuf;

    fn outcome(name: &str, ok: bool) -> FileOutcome {
        FileOutcome {
            file: LocalFile {
                path: PathBuf::from("/data").join(name),
                relative: PathBuf::from(name),
            },
            attempts: 1,
            result: if ok {
                Ok(RemoteFile {
                    id: format!("id-{}", name),
                    name: name.to_string(),
                    size: Some(1),
                })
            } else {
                Err(FailureKind::Rejected {
                    reason: "denied".to_string(),
                })
            },
        }
    }

    fn summary(outcomes: Vec<FileOutcome>) -> RunSummary {
        RunSummary {
            folder: RemoteFolder {
                id: "f".to_string(),
                name: "run".to_string(),
                parent_id: None,
            },
            outcomes,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_counts() {
        let summary = summary(vec![
            outcome("a.txt", true),
            outcome("b.txt", false),
            outcome("c.txt", true),
        ]);

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.is_success());

        let failed: Vec<_> = summary.failures().map(|o| o.file.relative.clone()).collect();
        assert_eq!(failed, vec![PathBuf::from("b.txt")]);
    }

    #[test]
    fn test_empty_run_is_success() {
        let summary = summary(Vec::new());
        assert_eq!(summary.total(), 0);
        assert!(summary.is_success());
    }
}
