//! OAuth2 user credentials: token cache, refresh and interactive consent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consent::{consent_url, random_state, CallbackListener, Pkce};
use crate::error::{DriveError, Result};
use crate::models::{
    default_token_uri, ClientSecrets, ClientSecretsFile, TokenErrorResponse, TokenResponse,
};

/// Google Drive API scope (full access).
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Default wait for the user to finish the consent page.
const DEFAULT_CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Authorized user credential as stored in the token cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token.
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// A credential without an expiry never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + chrono::Duration::seconds(EXPIRY_BUFFER_SECS),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Where the credential is cached between runs.
pub trait TokenStore {
    /// Returns `None` when nothing usable is stored.
    fn load(&self) -> Result<Option<Credential>>;

    /// Overwrite the stored credential.
    fn save(&self, credential: &Credential) -> Result<()>;
}

/// JSON token cache on local disk (`token.json` by default).
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Credential>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!("Ignoring unreadable token cache {:?}: {}", self.path, e);
                Ok(None)
            }
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string_pretty(credential)?;
        fs::write(&self.path, json)?;
        debug!("Saved credential to {:?}", self.path);
        Ok(())
    }
}

/// Shows the consent URL to the user.
pub type ConsentPrompt = Box<dyn Fn(&str)>;

/// Print the consent URL and try to open it in the default browser.
pub fn open_in_browser(url: &str) {
    eprintln!("Please visit this URL to authorize this application: {}", url);
    if let Err(e) = open::that(url) {
        warn!("Failed to open browser automatically: {}", e);
    }
}

/// Produces a usable credential: cached, refreshed, or freshly authorized.
pub struct CredentialManager {
    store: Box<dyn TokenStore>,
    client_secrets_path: PathBuf,
    scopes: Vec<String>,
    consent_timeout: Duration,
    consent_prompt: ConsentPrompt,
    http: Client,
}

impl CredentialManager {
    /// Create a manager.
    ///
    /// # Arguments
    /// * `store` - Token cache
    /// * `client_secrets_path` - OAuth client file, read only when the user
    ///   has to authorize interactively
    /// * `scopes` - Permissions requested on interactive authorization
    pub fn new<S, P>(store: S, client_secrets_path: P, scopes: Vec<String>) -> Self
    where
        S: TokenStore + 'static,
        P: Into<PathBuf>,
    {
        Self {
            store: Box::new(store),
            client_secrets_path: client_secrets_path.into(),
            scopes,
            consent_timeout: DEFAULT_CONSENT_TIMEOUT,
            consent_prompt: Box::new(open_in_browser),
            http: Client::new(),
        }
    }

    pub fn with_consent_timeout(mut self, timeout: Duration) -> Self {
        self.consent_timeout = timeout;
        self
    }

    /// Replace how the consent URL reaches the user. The default is
    /// [`open_in_browser`].
    pub fn with_consent_prompt<F>(mut self, prompt: F) -> Self
    where
        F: Fn(&str) + 'static,
    {
        self.consent_prompt = Box::new(prompt);
        self
    }

    /// Read the cached credential, if any.
    pub fn load(&self) -> Result<Option<Credential>> {
        self.store.load()
    }

    /// Overwrite the cached credential.
    pub fn persist(&self, credential: &Credential) -> Result<()> {
        self.store.save(credential)
    }

    /// Load the cache and make sure the result is valid.
    pub async fn authorize(&self) -> Result<Credential> {
        let cached = self.load()?;
        self.ensure_valid(cached).await
    }

    /// Return a valid credential.
    ///
    /// A present, unexpired credential is returned as is and nothing is
    /// written. An expired one with a refresh token is refreshed; anything
    /// else goes through the interactive consent flow. Every new or
    /// refreshed credential is persisted before it is returned.
    pub async fn ensure_valid(&self, credential: Option<Credential>) -> Result<Credential> {
        let credential = match credential {
            Some(cred) if !cred.is_expired() => {
                debug!("Cached credential is still valid");
                return Ok(cred);
            }
            Some(cred) if cred.can_refresh() => {
                info!("Refreshing expired access token");
                self.refresh(&cred).await?
            }
            _ => {
                info!("No usable credential; starting authorization flow");
                self.run_consent_flow().await?
            }
        };

        self.persist(&credential)?;
        Ok(credential)
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| DriveError::TokenRefreshError("no refresh token".to_string()))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = request_token(&self.http, &credential.token_uri, &params)
            .await
            .map_err(DriveError::TokenRefreshError)?;

        Ok(Credential {
            token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| credential.refresh_token.clone()),
            token_uri: credential.token_uri.clone(),
            client_id: credential.client_id.clone(),
            client_secret: credential.client_secret.clone(),
            scopes: response
                .scope
                .map(|s| split_scopes(&s))
                .unwrap_or_else(|| credential.scopes.clone()),
            expiry: response.expires_in.map(expiry_from_now),
        })
    }

    /// Read the `installed` (or `web`) block of the client secrets file.
    pub fn read_client_secrets(&self) -> Result<ClientSecrets> {
        let content = fs::read_to_string(&self.client_secrets_path)?;
        let file: ClientSecretsFile = serde_json::from_str(&content)?;
        file.installed.or(file.web).ok_or_else(|| {
            DriveError::InvalidClientSecrets(format!(
                "{:?} has neither an \"installed\" nor a \"web\" client",
                self.client_secrets_path
            ))
        })
    }

    async fn run_consent_flow(&self) -> Result<Credential> {
        let secrets = self.read_client_secrets()?;
        let listener = CallbackListener::bind().await?;

        let pkce = Pkce::generate();
        let state = random_state();
        let url = consent_url(
            &secrets,
            &self.scopes,
            listener.redirect_uri(),
            &state,
            &pkce.challenge,
        );

        (self.consent_prompt)(&url);

        let code = tokio::time::timeout(self.consent_timeout, listener.wait_for_code(&state))
            .await
            .map_err(|_| {
                DriveError::ConsentDenied(format!(
                    "no response within {} seconds",
                    self.consent_timeout.as_secs()
                ))
            })??;

        info!("Exchanging authorization code for tokens");
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("redirect_uri", listener.redirect_uri()),
        ];
        let response = request_token(&self.http, &secrets.token_uri, &params)
            .await
            .map_err(DriveError::AuthenticationError)?;

        Ok(Credential {
            token: response.access_token,
            refresh_token: response.refresh_token,
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            scopes: response
                .scope
                .map(|s| split_scopes(&s))
                .unwrap_or_else(|| self.scopes.clone()),
            expiry: response.expires_in.map(expiry_from_now),
        })
    }
}

/// POST a grant to the token endpoint. Errors come back as a message so the
/// caller can pick the variant.
async fn request_token(
    http: &Client,
    token_uri: &str,
    params: &[(&str, &str)],
) -> std::result::Result<TokenResponse, String> {
    let response = http
        .post(token_uri)
        .form(params)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
            Ok(err) => match err.error_description {
                Some(desc) => format!("{}: {}", err.error, desc),
                None => err.error,
            },
            Err(_) => format!("Status {}: {}", status, body),
        });
    }

    response.json().await.map_err(|e| e.to_string())
}

fn split_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(String::from).collect()
}

fn expiry_from_now(expires_in: u64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(expires_in as i64)
}
