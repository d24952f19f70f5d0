//! Per-account Gmail clients
//!
//! Each account has its own stored credentials. Clients are built on first
//! use and cached for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::error::{AuthError, GmailMcpError, Result};
use crate::gmail::auth::Authenticator;
use crate::gmail::client::GmailClient;
use crate::telemetry::account::DEFAULT_ACCOUNT;
use crate::telemetry::metrics::MetricsSink;

/// Lazily built, cached [`GmailClient`] per account name
pub struct GmailAccounts {
    config: Config,
    metrics: Arc<dyn MetricsSink>,
    clients: RwLock<HashMap<String, Arc<GmailClient>>>,
}

impl GmailAccounts {
    pub fn new(config: Config, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            metrics,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for `account`, building it on first use
    ///
    /// Fails when the account has never been authenticated.
    pub async fn client(&self, account: &str) -> Result<Arc<GmailClient>> {
        let account = normalize(account);

        if let Some(client) = self.clients.read().await.get(account) {
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get(account) {
            return Ok(Arc::clone(client));
        }

        let authenticator =
            Authenticator::new(self.config.clone(), account, Arc::clone(&self.metrics)).await?;
        if !authenticator.is_authenticated().await {
            return Err(GmailMcpError::Auth(AuthError::CredentialsNotFound {
                path: self.config.credentials_path_for(account)?.display().to_string(),
            }));
        }

        info!(account, "Gmail client ready");
        let client = Arc::new(GmailClient::new(
            Arc::new(authenticator),
            Arc::clone(&self.metrics),
        ));
        clients.insert(account.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Number of cached clients
    pub async fn cached(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn normalize(account: &str) -> &str {
    if account.is_empty() {
        DEFAULT_ACCOUNT
    } else {
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::metrics::NoopMetrics;
    use std::path::PathBuf;

    fn accounts() -> GmailAccounts {
        let dir = std::env::temp_dir().join("gmail-mcp-accounts-test-missing");
        let config = Config::from_lookup(PathBuf::from(dir), |_| None);
        GmailAccounts::new(config, Arc::new(NoopMetrics))
    }

    #[test]
    fn test_normalize_empty_account() {
        assert_eq!(normalize(""), DEFAULT_ACCOUNT);
        assert_eq!(normalize("work"), "work");
    }

    #[tokio::test]
    async fn test_missing_keys_is_an_error_and_not_cached() {
        let accounts = accounts();
        let err = accounts.client("work").await.err().unwrap();
        assert!(matches!(err, GmailMcpError::Auth(AuthError::KeysFileNotFound { .. })));
        assert_eq!(accounts.cached().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_account_name_rejected() {
        let err = accounts().client("../../etc").await.err().unwrap();
        assert!(matches!(err, GmailMcpError::Auth(_) | GmailMcpError::Config(_)));
    }
}
