//! Common utilities and types shared across driveup crates.
//!
//! This module provides the error taxonomy used by every library crate and
//! the naming rules for the per-run remote folder.

pub mod error;
pub mod naming;

pub use error::{Error, Result};
pub use naming::{folder_name, sanitize_name, FolderName, TIMESTAMP_FORMAT};
