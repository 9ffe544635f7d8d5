//! Remote storage abstraction for driveup.
//!
//! This module provides the trait the uploader talks to, the Google Drive
//! session that implements it, and an in-memory backend for tests.
//!
//! # Design Principles
//! - Explicit session: the authenticated handle is a value, passed by reference
//! - Async operations: all I/O operations are async
//! - Streaming support: large files are uploaded in chunks read from disk
//! - Unified error semantics: transport and API failures map onto the common error

pub mod gdrive;
pub mod memory;
pub mod provider;

pub use gdrive::{Authenticator, DriveSession};
pub use memory::{MemoryStorage, ScriptedFailure};
pub use provider::{RemoteFile, RemoteFolder, RemoteStorage};
