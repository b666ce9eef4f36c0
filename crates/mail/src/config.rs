//! Configuration loading for the relay
//!
//! OAuth client credentials are loaded from (in order of priority):
//! 1. JSON file (Google Cloud Console format) in the config directory
//! 2. Environment variables
//!
//! Runtime settings come from `mailhook.json` in the config directory,
//! with environment variables overriding individual fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::filter::{DEFAULT_FILTER_QUERIES, FilterSet};
use crate::gmail::{GmailGateway, GoogleTokenRefresher};
use crate::models::PlatformId;

/// Credentials filename in the mailhook config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Settings filename in the mailhook config directory
pub const SETTINGS_FILE: &str = "mailhook.json";

/// OAuth credentials used to refresh Gmail access tokens
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials from the config file, falling back to the environment
    pub fn load() -> Result<Self> {
        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GOOGLE_CLIENT_ID")
            .context("GOOGLE_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Get the default credentials file path
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// Runtime settings of the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Platform whose credentials and watermarks this relay manages
    pub platform_id: String,
    /// SQLite database holding credentials and the task outbox
    pub database_path: Option<PathBuf>,
    pub gmail_base_url: String,
    pub token_url: String,
    /// Timeout for each Gmail API call
    pub request_timeout_secs: u64,
    /// Timeout for the token refresh call
    pub refresh_timeout_secs: u64,
    /// Refresh tokens expiring within this window
    pub refresh_buffer_secs: i64,
    /// Token lifetime assumed when the token endpoint omits `expires_in`
    pub default_token_lifetime_secs: i64,
    /// Page size of history requests
    pub history_max_results: usize,
    /// Gmail-style filter queries, one rule each
    pub filters: Vec<String>,
    pub log_level: String,
    /// Write logs to `<log_dir>/mailhook.log` instead of stderr, with errors
    /// also copied to `<log_dir>/mailhook_errors.log`
    pub log_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            platform_id: PlatformId::GMAIL.to_string(),
            database_path: None,
            gmail_base_url: GmailGateway::BASE_URL.to_string(),
            token_url: GoogleTokenRefresher::TOKEN_URL.to_string(),
            request_timeout_secs: 30,
            refresh_timeout_secs: 10,
            refresh_buffer_secs: 300,
            default_token_lifetime_secs: 3600,
            history_max_results: 100,
            filters: DEFAULT_FILTER_QUERIES.iter().map(|q| q.to_string()).collect(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Settings {
    /// Load `mailhook.json` (if present) and apply environment overrides
    pub fn load() -> Result<Self> {
        let settings: Settings = config::load_json_or_default(SETTINGS_FILE)?;
        settings.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Parse settings from a JSON string; absent fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(json).context("Failed to parse settings JSON")?;
        settings.validated()
    }

    /// Apply overrides looked up through `var`
    pub fn with_env_overrides<F>(mut self, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("MAILHOOK_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(platform) = var("MAILHOOK_PLATFORM_ID") {
            self.platform_id = platform;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(dir) = var("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        self.validated()
    }

    fn validated(self) -> Result<Self> {
        url::Url::parse(&self.gmail_base_url)
            .with_context(|| format!("Invalid gmail_base_url: {}", self.gmail_base_url))?;
        url::Url::parse(&self.token_url)
            .with_context(|| format!("Invalid token_url: {}", self.token_url))?;
        if self.platform_id.trim().is_empty() {
            anyhow::bail!("platform_id must not be empty");
        }
        Ok(self)
    }

    pub fn platform(&self) -> PlatformId {
        PlatformId::new(self.platform_id.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn refresh_buffer(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_buffer_secs)
    }

    /// Build the filter set; an empty list falls back to the defaults
    pub fn filter_set(&self) -> Result<FilterSet> {
        if self.filters.is_empty() {
            return Ok(FilterSet::default());
        }
        FilterSet::from_queries(self.filters.as_slice())
    }

    /// Database path, defaulting to `mailhook.sqlite` in the config directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path("mailhook.sqlite")
                .context("Could not determine config directory"),
        }
    }
}
