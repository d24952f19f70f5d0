//! Configuration management for the Gmail MCP Server
//!
//! Handles paths, accounts, safety mode and telemetry settings. Everything
//! is read from the environment once at startup and is immutable afterwards.

use std::path::PathBuf;

use tracing::Level;

use crate::error::{ConfigError, GmailMcpError, Result};
use crate::telemetry::account::DEFAULT_ACCOUNT;

/// Configuration for the Gmail MCP Server
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing configuration files
    pub config_dir: PathBuf,

    /// Path to OAuth keys file (client credentials)
    pub oauth_path: PathBuf,

    /// Path to stored credentials of the default account
    pub credentials_path: PathBuf,

    /// OAuth callback URL
    pub oauth_callback_url: String,

    /// OAuth callback port
    pub oauth_callback_port: u16,

    /// Gmail API scopes
    pub scopes: Vec<String>,

    /// Hide and refuse tools that modify the mailbox
    pub read_only: bool,

    /// Token for GitHub API calls made by the cleanup routine
    pub github_token: Option<String>,

    /// Instrumentation settings
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Create a new configuration from the environment, with default paths
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self::from_lookup(config_dir, |name| std::env::var(name).ok()))
    }

    /// Build a configuration rooted at `config_dir`, reading variables through `lookup`.
    pub fn from_lookup<F>(config_dir: PathBuf, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let oauth_path = lookup("GMAIL_OAUTH_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("gcp-oauth.keys.json"));

        let credentials_path = lookup("GMAIL_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir.join("credentials.json"));

        let oauth_callback_port = lookup("GMAIL_OAUTH_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let oauth_callback_url = format!("http://localhost:{}/oauth2callback", oauth_callback_port);

        let read_only = lookup("GMAIL_MCP_READ_ONLY")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let github_token = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty());

        Self {
            telemetry: TelemetryConfig::from_lookup(&lookup),
            config_dir,
            oauth_path,
            credentials_path,
            oauth_callback_url,
            oauth_callback_port,
            scopes: vec![
                "https://www.googleapis.com/auth/gmail.modify".to_string(),
                "https://www.googleapis.com/auth/gmail.settings.basic".to_string(),
            ],
            read_only,
            github_token,
        }
    }

    /// Get the configuration directory, creating it if necessary
    fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| {
                GmailMcpError::Config(ConfigError::DirNotFound {
                    path: "~".to_string(),
                })
            })?
            .join(".gmail-mcp");

        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).map_err(|_| {
                GmailMcpError::Config(ConfigError::DirCreationFailed {
                    path: config_dir.display().to_string(),
                })
            })?;
        }

        Ok(config_dir)
    }

    /// Stored-credentials file of `account`.
    ///
    /// The default account keeps the historical `credentials.json`; every
    /// other account lives under `accounts/<name>.json`.
    pub fn credentials_path_for(&self, account: &str) -> Result<PathBuf> {
        if account.is_empty() || account == DEFAULT_ACCOUNT {
            return Ok(self.credentials_path.clone());
        }
        validate_account_name(account)?;
        Ok(self
            .config_dir
            .join("accounts")
            .join(format!("{}.json", account)))
    }

    /// Check if OAuth keys file exists
    pub fn oauth_keys_exist(&self) -> bool {
        self.oauth_path.exists()
    }

    /// Try to find OAuth keys in current directory and copy to config dir
    pub fn find_and_copy_oauth_keys(&self) -> Result<bool> {
        let local_oauth = std::env::current_dir()
            .map_err(GmailMcpError::Io)?
            .join("gcp-oauth.keys.json");

        if local_oauth.exists() && !self.oauth_keys_exist() {
            std::fs::copy(&local_oauth, &self.oauth_path).map_err(GmailMcpError::Io)?;
            return Ok(true);
        }

        Ok(false)
    }
}

/// Account names become file names, so only a safe alphabet is allowed.
fn validate_account_name(account: &str) -> Result<()> {
    let valid = account
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
        && !account.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(GmailMcpError::Config(ConfigError::InvalidConfig {
            message: format!("invalid account name: {}", account),
        }))
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Telemetry settings, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Create spans and metrics through the global OpenTelemetry providers
    pub enabled: bool,

    /// Attach raw account identifiers to metric points
    pub detailed_metrics: bool,

    /// Audit logger master switch
    pub audit_enabled: bool,

    /// Use the full-identity view for routine invocation logs
    pub audit_include_pii: bool,

    /// Minimum severity of audit lines
    pub audit_level: Level,

    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            detailed_metrics: false,
            audit_enabled: true,
            audit_include_pii: false,
            audit_level: Level::INFO,
            log_format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| lookup(name).map(|v| parse_bool(&v)).unwrap_or(default);

        Self {
            enabled: flag("GMAIL_MCP_TELEMETRY_ENABLED", defaults.enabled),
            detailed_metrics: flag("GMAIL_MCP_METRICS_DETAILED", defaults.detailed_metrics),
            audit_enabled: flag("GMAIL_MCP_AUDIT_ENABLED", defaults.audit_enabled),
            audit_include_pii: flag("GMAIL_MCP_AUDIT_INCLUDE_PII", defaults.audit_include_pii),
            audit_level: lookup("GMAIL_MCP_AUDIT_LEVEL")
                .and_then(|v| v.trim().parse::<Level>().ok())
                .unwrap_or(defaults.audit_level),
            log_format: lookup("GMAIL_MCP_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
        }
    }
}

/// `1`, `true`, `yes` and `on` (any case) are true; everything else is false.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Gmail API constants
pub mod gmail {
    /// Base URL for Gmail API
    pub const API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";

    pub mod labels {
        pub const INBOX: &str = "INBOX";
        pub const UNREAD: &str = "UNREAD";
    }
}

/// GitHub API constants
pub mod github {
    pub const API_BASE_URL: &str = "https://api.github.com";

    /// Sender of GitHub notification mail
    pub const NOTIFICATIONS_SENDER: &str = "notifications@github.com";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_config_creation() {
        let config = Config::new();
        assert!(config.is_ok());
    }

    #[test]
    fn test_default_scopes() {
        let config = Config::from_lookup(PathBuf::from("/tmp/gmail-mcp"), lookup(&[]));
        assert_eq!(config.scopes.len(), 2);
        assert!(config.scopes[0].contains("gmail.modify"));
        assert!(!config.read_only);
        assert!(config.github_token.is_none());
    }

    #[test]
    fn test_parse_bool() {
        for value in ["1", "true", "TRUE", "yes", "On", " true "] {
            assert!(parse_bool(value), "{:?}", value);
        }
        for value in ["", "0", "false", "no", "off", "enabled"] {
            assert!(!parse_bool(value), "{:?}", value);
        }
    }

    #[test]
    fn test_telemetry_defaults() {
        let config = TelemetryConfig::from_lookup(lookup(&[]));
        assert_eq!(config, TelemetryConfig::default());
        assert!(config.audit_enabled);
        assert!(!config.enabled);
    }

    #[test]
    fn test_telemetry_from_env_values() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("GMAIL_MCP_TELEMETRY_ENABLED", "yes"),
            ("GMAIL_MCP_METRICS_DETAILED", "1"),
            ("GMAIL_MCP_AUDIT_ENABLED", "off"),
            ("GMAIL_MCP_AUDIT_INCLUDE_PII", "true"),
            ("GMAIL_MCP_AUDIT_LEVEL", "warn"),
            ("GMAIL_MCP_LOG_FORMAT", "JSON"),
        ]));

        assert!(config.enabled);
        assert!(config.detailed_metrics);
        assert!(!config.audit_enabled);
        assert!(config.audit_include_pii);
        assert_eq!(config.audit_level, Level::WARN);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_audit_level_falls_back_to_info() {
        let config = TelemetryConfig::from_lookup(lookup(&[("GMAIL_MCP_AUDIT_LEVEL", "loud")]));
        assert_eq!(config.audit_level, Level::INFO);
    }

    #[test]
    fn test_read_only_and_github_token() {
        let config = Config::from_lookup(
            PathBuf::from("/tmp/gmail-mcp"),
            lookup(&[("GMAIL_MCP_READ_ONLY", "true"), ("GITHUB_TOKEN", "ghp_x")]),
        );
        assert!(config.read_only);
        assert_eq!(config.github_token.as_deref(), Some("ghp_x"));
    }

    #[test]
    fn test_credentials_path_per_account() {
        let config = Config::from_lookup(PathBuf::from("/tmp/gmail-mcp"), lookup(&[]));

        assert_eq!(
            config.credentials_path_for("default").unwrap(),
            PathBuf::from("/tmp/gmail-mcp/credentials.json")
        );
        assert_eq!(
            config.credentials_path_for("work").unwrap(),
            PathBuf::from("/tmp/gmail-mcp/accounts/work.json")
        );
        assert!(config.credentials_path_for("../etc/passwd").is_err());
        assert!(config.credentials_path_for(".hidden").is_err());
    }
}
