//! OAuth authentication for Gmail API
//!
//! Handles, per account:
//! - Loading client credentials
//! - Interactive browser-based consent
//! - Token storage and refresh
//!
//! Authentication and refresh attempts are reported to the metrics sink.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AuthError, GmailMcpError, Result};
use crate::telemetry::metrics::MetricsSink;

/// Tokens expiring within this many seconds are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 300;

/// OAuth client credentials
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthKeys {
    pub client_id: String,
    pub client_secret: String,
    pub auth_uri: String,
    pub token_uri: String,
}

/// OAuth keys file format (can be "installed" or "web")
#[derive(Debug, Deserialize)]
struct OAuthKeysFile {
    #[serde(alias = "web")]
    installed: Option<OAuthKeys>,
}

/// Stored credentials (tokens)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,

    pub refresh_token: Option<String>,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Expiry timestamp (Unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,

    #[serde(default)]
    pub scope: String,
}

impl StoredCredentials {
    /// Whether the access token should be refreshed at `now` (Unix seconds).
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.expiry_date
            .map(|expiry| expiry - now < REFRESH_MARGIN_SECS)
            .unwrap_or(false)
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Token response from OAuth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: String,
}

impl TokenResponse {
    fn into_credentials(self, fallback_refresh: Option<String>) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(fallback_refresh),
            token_type: self.token_type,
            expiry_date: self.expires_in.map(|e| unix_now() + e),
            scope: self.scope,
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// OAuth authenticator for one account
pub struct Authenticator {
    config: Config,
    account: String,
    credentials_path: PathBuf,
    http_client: reqwest::Client,
    keys: OAuthKeys,
    credentials: RwLock<Option<StoredCredentials>>,
    metrics: Arc<dyn MetricsSink>,
}

impl Authenticator {
    /// Create an authenticator for `account`, loading stored tokens if present
    pub async fn new(config: Config, account: &str, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let keys = Self::load_oauth_keys(&config.oauth_path)?;
        let credentials_path = config.credentials_path_for(account)?;

        let auth = Self {
            config,
            account: account.to_string(),
            credentials_path,
            http_client: reqwest::Client::new(),
            keys,
            credentials: RwLock::new(None),
            metrics,
        };

        if auth.credentials_path.exists() {
            match auth.load_credentials().await {
                Ok(creds) => *auth.credentials.write().await = Some(creds),
                Err(e) => warn!(account = %auth.account, "Ignoring unreadable credentials: {}", e),
            }
        }

        Ok(auth)
    }

    fn load_oauth_keys(path: &Path) -> Result<OAuthKeys> {
        if !path.exists() {
            return Err(GmailMcpError::Auth(AuthError::KeysFileNotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        let keys_file: OAuthKeysFile = serde_json::from_str(&content)?;

        keys_file
            .installed
            .ok_or(GmailMcpError::Auth(AuthError::InvalidKeysFormat))
    }

    async fn load_credentials(&self) -> Result<StoredCredentials> {
        let content = tokio::fs::read_to_string(&self.credentials_path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_credentials(&self, credentials: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.credentials_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(credentials)?;
        tokio::fs::write(&self.credentials_path, content).await?;
        Ok(())
    }

    /// Account this authenticator acts for
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Check if we have credentials
    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    /// Get a valid access token, refreshing if necessary
    pub async fn get_access_token(&self) -> Result<String> {
        let (token, refresh) = {
            let creds = self.credentials.read().await;
            match creds.as_ref() {
                Some(creds) if creds.needs_refresh(unix_now()) => (None, creds.refresh_token.clone()),
                Some(creds) => (Some(creds.access_token.clone()), None),
                None => {
                    return Err(GmailMcpError::Auth(AuthError::CredentialsNotFound {
                        path: self.credentials_path.display().to_string(),
                    }))
                }
            }
        };

        match token {
            Some(token) => Ok(token),
            None => {
                let result = self.refresh_token(refresh).await;
                self.metrics.record_oauth_refresh(result.is_ok());
                result
            }
        }
    }

    async fn refresh_token(&self, refresh_token: Option<String>) -> Result<String> {
        let refresh_token = refresh_token.ok_or_else(|| {
            GmailMcpError::Auth(AuthError::TokenRefreshFailed {
                message: "No refresh token available".to_string(),
            })
        })?;
        debug!(account = %self.account, "Refreshing access token");

        let params = [
            ("client_id", self.keys.client_id.as_str()),
            ("client_secret", self.keys.client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&self.keys.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GmailMcpError::Auth(AuthError::TokenRefreshFailed { message: text }));
        }

        let token_response: TokenResponse = response.json().await?;
        let credentials = token_response.into_credentials(Some(refresh_token));

        self.save_credentials(&credentials).await?;
        let token = credentials.access_token.clone();
        *self.credentials.write().await = Some(credentials);

        Ok(token)
    }

    /// Generate the authorization URL
    pub fn generate_auth_url(&self) -> String {
        let scopes = self.config.scopes.join(" ");
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            self.keys.auth_uri,
            urlencoding::encode(&self.keys.client_id),
            urlencoding::encode(&self.config.oauth_callback_url),
            urlencoding::encode(&scopes)
        );
        if self.account.contains('@') {
            url.push_str(&format!("&login_hint={}", urlencoding::encode(&self.account)));
        }
        url
    }

    /// Exchange authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<StoredCredentials> {
        let params = [
            ("client_id", self.keys.client_id.as_str()),
            ("client_secret", self.keys.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.oauth_callback_url.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.keys.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GmailMcpError::Auth(AuthError::TokenExchangeFailed { message: text }));
        }

        let token_response: TokenResponse = response.json().await?;
        let credentials = token_response.into_credentials(None);

        self.save_credentials(&credentials).await?;
        *self.credentials.write().await = Some(credentials.clone());

        Ok(credentials)
    }

    /// Run the browser consent flow, recording the outcome
    pub async fn authenticate_interactive(&self) -> Result<()> {
        let result = self.consent_flow().await;
        self.metrics.record_oauth_auth(&self.account, result.is_ok());
        result
    }

    async fn consent_flow(&self) -> Result<()> {
        use axum::{extract::Query, response::Html, routing::get, Router};
        use std::collections::HashMap;
        use tokio::sync::{oneshot, Mutex};

        let auth_url = self.generate_auth_url();
        eprintln!("\nAuthenticating account '{}'. Please visit this URL:", self.account);
        eprintln!("{}\n", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Could not open browser automatically: {}", e);
            eprintln!("Please open the URL manually.");
        }

        let (tx, rx) = oneshot::channel::<String>();
        let tx = Arc::new(Mutex::new(Some(tx)));

        let callback = move |Query(params): Query<HashMap<String, String>>| {
            let tx = Arc::clone(&tx);
            async move {
                match params.get("code") {
                    Some(code) => {
                        if let Some(tx) = tx.lock().await.take() {
                            let _ = tx.send(code.clone());
                        }
                        Html("<html><body><h1>Authentication successful!</h1><p>You can close this window.</p></body></html>")
                    }
                    None => Html("<html><body><h1>Authentication failed</h1><p>No authorization code received.</p></body></html>"),
                }
            }
        };

        let app = Router::new().route("/oauth2callback", get(callback));

        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.oauth_callback_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(port = self.config.oauth_callback_port, "Waiting for OAuth callback");

        tokio::select! {
            result = axum::serve(listener, app) => {
                result.map_err(|e| GmailMcpError::Auth(AuthError::CallbackError {
                    message: e.to_string(),
                }))?;
                Err(GmailMcpError::Auth(AuthError::NoAuthCode))
            }
            code = rx => {
                let code = code.map_err(|_| GmailMcpError::Auth(AuthError::NoAuthCode))?;
                self.exchange_code(&code).await?;
                info!(account = %self.account, "Authentication completed");
                Ok(())
            }
        }
    }
}
