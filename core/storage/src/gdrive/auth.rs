//! OAuth2 authentication and token management for Google Drive.

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    reqwest, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, ErrorResponse, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::error::Error as StdError;
use std::path::PathBuf;

use driveup_common::{Error, Result};

use super::credentials::{self, AuthorizedUser};

/// OAuth2 authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google Drive OAuth2 scope: access limited to files created by this app.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// Google client with authorization and token endpoints configured.
type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Whether `err` or any of its sources is a timeout.
fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<reqwest::Error>().is_some_and(|e| e.is_timeout()) {
            return true;
        }
        if e
            .downcast_ref::<std::io::Error>()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::TimedOut)
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// Render an error with its source chain.
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        message.push_str(": ");
        message.push_str(&e.to_string());
        current = e.source();
    }
    message
}

/// Map a failed token request onto the error taxonomy.
///
/// Transport failures stay retryable; anything the endpoint answered is
/// an authentication failure.
fn token_error<RE, T>(context: &str, err: RequestTokenError<RE, T>) -> Error
where
    RE: StdError + 'static,
    T: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::Request(e) => {
            let detail = format!("{}: {}", context, describe(&e));
            if is_timeout(&e) {
                Error::Timeout(detail)
            } else {
                Error::Network(detail)
            }
        }
        other => Error::Authentication(format!("{}: {}", context, other)),
    }
}

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: Option<String>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.access_token.is_empty() || self.expires_at < Utc::now() + Duration::minutes(5)
    }

    fn from_response(response: &BasicTokenResponse, previous_refresh: Option<&str>) -> Self {
        let expires_in = response
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));

        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        // Refresh tokens may or may not be returned in refresh response
        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous_refresh.map(str::to_string));

        Self {
            access_token: response.access_token().secret().clone(),
            refresh_token,
            expires_at,
        }
    }
}

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Client ID of the installed application.
    pub client_id: String,
    /// Client secret of the installed application.
    pub client_secret: String,
    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
}

impl AuthConfig {
    /// Configuration against Google's default endpoints.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

/// An authorization started in the browser, waiting for its code.
pub struct PendingAuthorization {
    url: String,
    csrf_state: String,
    redirect_url: RedirectUrl,
    pkce_verifier: PkceCodeVerifier,
}

impl PendingAuthorization {
    /// Consent URL the user has to visit.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// CSRF state the redirect must echo back.
    pub fn csrf_state(&self) -> &str {
        &self.csrf_state
    }
}

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: GoogleClient,
    http: reqwest::Client,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager.
    pub fn new(config: AuthConfig) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(config.auth_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            );

        // Token requests never follow redirects
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
        })
    }

    /// Start an authorization for the given loopback redirect URL.
    ///
    /// Requests offline access with a consent prompt so that a refresh
    /// token is issued, and protects the exchange with PKCE.
    pub fn authorization_url(&self, redirect_url: &str) -> Result<PendingAuthorization> {
        let redirect_url = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_redirect_uri(Cow::Borrowed(&redirect_url))
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        Ok(PendingAuthorization {
            url: auth_url.to_string(),
            csrf_state: csrf_token.secret().clone(),
            redirect_url,
            pkce_verifier,
        })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Preconditions
    /// - `code` was delivered to the redirect URL of `pending`
    ///
    /// # Errors
    /// - Invalid authorization code
    /// - No refresh token in the response
    /// - Network errors
    pub async fn exchange_code(&self, pending: PendingAuthorization, code: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_redirect_uri(Cow::Owned(pending.redirect_url))
            .set_pkce_verifier(pending.pkce_verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| token_error("Token exchange failed", e))?;

        let tokens = Tokens::from_response(&token_result, None);
        if tokens.refresh_token.is_none() {
            return Err(Error::Authentication(
                "No refresh token received. Ensure 'offline' access and 'consent' prompt were requested.".to_string(),
            ));
        }

        Ok(tokens)
    }

    /// Refresh an access token using the refresh token.
    ///
    /// # Errors
    /// - `Authentication` for an invalid or revoked refresh token
    /// - `Network` or `Timeout` when the token endpoint cannot be reached
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| token_error("Token refresh failed", e))?;

        Ok(Tokens::from_response(&token_result, Some(refresh_token)))
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

/// Token manager that automatically refreshes expired tokens.
///
/// Refreshed tokens are written back to the token file when one is set.
pub struct TokenManager {
    auth_manager: AuthManager,
    tokens: tokio::sync::RwLock<Tokens>,
    token_path: Option<PathBuf>,
}

impl TokenManager {
    /// Create a new token manager with initial tokens.
    pub fn new(auth_manager: AuthManager, tokens: Tokens) -> Self {
        Self {
            auth_manager,
            tokens: tokio::sync::RwLock::new(tokens),
            token_path: None,
        }
    }

    /// Persist refreshed tokens to `path`.
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = Some(path.into());
        self
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - No refresh token available for an expired access token
    /// - Token refresh failed
    pub async fn get_access_token(&self) -> Result<String> {
        let tokens = self.tokens.read().await;

        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        drop(tokens);

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        let refresh_token = tokens.refresh_token.clone().ok_or_else(|| {
            Error::Authentication("Access token expired and no refresh token available".to_string())
        })?;

        tracing::info!("Refreshing expired access token");

        let new_tokens = self.auth_manager.refresh_token(&refresh_token).await?;
        *tokens = new_tokens;

        if let Some(path) = &self.token_path {
            let record = AuthorizedUser::from_parts(self.auth_manager.config(), &tokens);
            if let Err(e) = credentials::save_token_file(path, &record).await {
                tracing::warn!("Failed to save refreshed token to '{}': {}", path.display(), e);
            }
        }

        Ok(tokens.access_token.clone())
    }
}
