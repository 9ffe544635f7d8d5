//! Google Drive storage backend for driveup.
//!
//! This module provides a remote storage backend using Google Drive with:
//! - OAuth2 installed-application flow with a loopback redirect and PKCE
//! - Automatic token refresh, written back to the token file
//! - Multipart uploads for small files, resumable uploads for large ones

pub mod auth;
pub mod authenticator;
pub mod client;
pub mod credentials;
pub mod loopback;
pub mod session;

#[cfg(test)]
mod test_http;

pub use auth::{AuthConfig, AuthManager, TokenManager, Tokens};
pub use authenticator::Authenticator;
pub use client::DriveClient;
pub use credentials::{AuthorizedUser, ClientSecrets};
pub use session::DriveSession;
