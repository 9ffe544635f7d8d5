//! On-disk credential material: the authorized-user token file and the
//! installed-application client secrets file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use driveup_common::{Error, Result};

use super::auth::{AuthConfig, Tokens, DRIVE_SCOPE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL};

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// Authorized-user token file, as written by Google's auth libraries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedUser {
    /// Last access token.
    #[serde(default)]
    pub token: Option<String>,
    /// Long-lived refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Access token expiry.
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl AuthorizedUser {
    /// Build the file record for a client and its current tokens.
    pub fn from_parts(config: &AuthConfig, tokens: &Tokens) -> Self {
        Self {
            token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone(),
            token_uri: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes: vec![DRIVE_SCOPE.to_string()],
            expiry: Some(tokens.expires_at),
        }
    }

    /// Split the record into client configuration and tokens.
    pub fn into_parts(self) -> (AuthConfig, Tokens) {
        let config = AuthConfig {
            client_id: self.client_id,
            client_secret: self.client_secret,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: self.token_uri,
        };

        let expires_at = match (&self.token, self.expiry) {
            (_, Some(expiry)) => expiry,
            // A token without a recorded expiry counts as freshly issued
            (Some(_), None) => Utc::now() + Duration::hours(1),
            (None, None) => DateTime::<Utc>::UNIX_EPOCH,
        };

        let tokens = Tokens {
            access_token: self.token.unwrap_or_default(),
            refresh_token: self.refresh_token,
            expires_at,
        };

        (config, tokens)
    }
}

/// OAuth client registration from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl From<ClientSecrets> for AuthConfig {
    fn from(secrets: ClientSecrets) -> Self {
        AuthConfig {
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            auth_url: secrets.auth_uri,
            token_url: secrets.token_uri,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    #[serde(default)]
    installed: Option<ClientSecrets>,
    #[serde(default)]
    web: Option<ClientSecrets>,
}

/// Parse a client secrets document (`installed` or `web` application).
pub fn parse_client_secrets(json: &str) -> Result<ClientSecrets> {
    let file: ClientSecretsFile = serde_json::from_str(json)?;
    file.installed.or(file.web).ok_or_else(|| {
        Error::Serialization(
            "Client secrets must contain an 'installed' or 'web' section".to_string(),
        )
    })
}

/// Load the client secrets file.
///
/// # Errors
/// - `Authentication` if the file does not exist or cannot be parsed
pub async fn load_client_secrets(path: &Path) -> Result<ClientSecrets> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::Authentication(format!(
                "Credentials file '{}' not found",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };

    parse_client_secrets(&json).map_err(|e| {
        Error::Authentication(format!(
            "Failed to load credentials from '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Load the token file.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
/// - `Serialization` if the file exists but is invalid or corrupted
pub async fn load_token_file(path: &Path) -> Result<Option<AuthorizedUser>> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write the token file, readable by the owner only on Unix.
pub async fn save_token_file(path: &Path, record: &AuthorizedUser) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    // an existing file keeps its old mode on open
    #[cfg(unix)]
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .await?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;

    Ok(())
}
