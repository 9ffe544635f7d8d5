//! Turns on-disk credential material into a [`DriveSession`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use driveup_common::{Error, Result};

use super::auth::{AuthConfig, AuthManager, TokenManager, Tokens};
use super::credentials::{self, AuthorizedUser};
use super::loopback::LoopbackReceiver;
use super::session::DriveSession;

/// How long to wait for the user to finish the browser consent.
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Produces a [`DriveSession`] from stored credentials.
///
/// Failure is fatal to a run; nothing here is retried.
#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials_path: PathBuf,
    token_path: PathBuf,
    interactive: bool,
    request_timeout: Duration,
}

impl Authenticator {
    /// Create an authenticator for a client secrets file and a token file.
    pub fn new(credentials_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_path: credentials_path.into(),
            token_path: token_path.into(),
            interactive: true,
            request_timeout: Duration::from_secs(300),
        }
    }

    /// Allow or forbid the browser consent flow.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Set the per-request timeout of the resulting session.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Obtain a session.
    ///
    /// `on_consent_url` is called with the consent URL if the browser flow
    /// is needed.
    ///
    /// # Postconditions
    /// - Newly obtained or refreshed tokens are written to the token file
    ///
    /// # Errors
    /// - `Authentication` when no usable credentials can be obtained
    pub async fn authenticate<F>(&self, on_consent_url: F) -> Result<DriveSession>
    where
        F: FnOnce(&str),
    {
        let (config, tokens, changed) = match self.stored_tokens().await? {
            Some((config, tokens, changed)) => (config, tokens, changed),
            None => {
                let (config, tokens) = self.authorize(on_consent_url).await?;
                (config, tokens, true)
            }
        };

        if changed {
            let record = AuthorizedUser::from_parts(&config, &tokens);
            credentials::save_token_file(&self.token_path, &record).await?;
            info!("Saved credentials to '{}'", self.token_path.display());
        }

        let token_manager =
            TokenManager::new(AuthManager::new(config)?, tokens).with_token_path(&self.token_path);

        DriveSession::new(Arc::new(token_manager), self.request_timeout)
    }

    /// Usable tokens from the token file, refreshing them when expired.
    ///
    /// The flag tells whether the tokens differ from what is on disk.
    async fn stored_tokens(&self) -> Result<Option<(AuthConfig, Tokens, bool)>> {
        let record = match credentials::load_token_file(&self.token_path).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(
                    "Invalid or corrupted token file '{}': {}",
                    self.token_path.display(),
                    e
                );
                return Ok(None);
            }
        };

        let (config, tokens) = record.into_parts();

        if !tokens.is_expired() {
            return Ok(Some((config, tokens, false)));
        }

        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            return Ok(None);
        };

        info!("Stored access token expired, refreshing");
        let manager = AuthManager::new(config.clone())?;
        match manager.refresh_token(refresh_token).await {
            Ok(tokens) => Ok(Some((config, tokens, true))),
            Err(e) => {
                error!("Failed to refresh token. Please re-authenticate: {}", e);
                Ok(None)
            }
        }
    }

    /// Run the browser consent flow against a loopback redirect.
    async fn authorize<F>(&self, on_consent_url: F) -> Result<(AuthConfig, Tokens)>
    where
        F: FnOnce(&str),
    {
        let secrets = credentials::load_client_secrets(&self.credentials_path).await?;

        if !self.interactive {
            return Err(Error::Authentication(format!(
                "No usable token in '{}' and interactive authorization is disabled",
                self.token_path.display()
            )));
        }

        let config = AuthConfig::from(secrets);
        let manager = AuthManager::new(config.clone())?;
        let receiver = LoopbackReceiver::bind().await?;
        let pending = manager.authorization_url(receiver.redirect_url())?;
        let state = pending.csrf_state().to_string();

        info!("Waiting for authorization in the browser");
        on_consent_url(pending.url());

        let code = tokio::time::timeout(AUTHORIZATION_TIMEOUT, receiver.wait_for_code(&state))
            .await
            .map_err(|_| Error::Authentication("Timed out waiting for authorization".to_string()))??;

        let tokens = manager.exchange_code(pending, &code).await?;
        Ok((config, tokens))
    }
}
