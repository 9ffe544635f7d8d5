//! Naming of the per-run remote folder.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp suffix format, one-second resolution.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y_%H-%M-%S";

/// Characters that are replaced by `_` in remote names.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace reserved characters with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if RESERVED.contains(&c) { '_' } else { c })
        .collect()
}

/// A validated, sanitized remote folder name of the form `<base>_<timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderName(String);

impl FolderName {
    /// Build a folder name from a base name and a point in time.
    ///
    /// # Errors
    /// - Returns error if `base` is empty or only whitespace
    pub fn new(base: &str, at: DateTime<Local>) -> crate::Result<Self> {
        if base.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "Folder base name cannot be empty".to_string(),
            ));
        }

        let stamped = format!("{}_{}", base, at.format(TIMESTAMP_FORMAT));
        Ok(Self(sanitize_name(&stamped)))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Folder name for a run starting now.
pub fn folder_name(base: &str) -> crate::Result<FolderName> {
    FolderName::new(base, Local::now())
}
