//! Google OAuth2 token refresh
//!
//! Exchanges a stored refresh token for a new access token.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result, anyhow};
use log::debug;
use std::time::Duration;

use super::api::TokenResponse;
use crate::config::{GmailCredentials, Settings};
use crate::credentials::{RefreshedToken, TokenRefresher};
use crate::models::Secret;

/// Refresh-token exchange against Google's token endpoint
pub struct GoogleTokenRefresher {
    agent: ureq::Agent,
    token_url: String,
    credentials: GmailCredentials,
}

impl GoogleTokenRefresher {
    /// Google OAuth2 token endpoint
    pub const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(credentials: GmailCredentials, token_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            token_url: token_url.into(),
            credentials,
        }
    }

    pub fn from_settings(credentials: GmailCredentials, settings: &Settings) -> Self {
        Self::new(credentials, &settings.token_url, settings.refresh_timeout())
    }
}

impl TokenRefresher for GoogleTokenRefresher {
    fn refresh(&self, refresh_token: &Secret) -> Result<RefreshedToken> {
        let response = self
            .agent
            .post(&self.token_url)
            .send_form([
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", refresh_token.expose()),
                ("grant_type", "refresh_token"),
            ])
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => anyhow!("token endpoint returned HTTP {}", code),
                other => anyhow!("Failed to refresh access token: {}", other),
            })?;

        let token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        debug!(
            "[AUTH] token endpoint answered token_type={} expires_in={:?}",
            token.token_type.as_deref().unwrap_or("unknown"),
            token.expires_in
        );

        Ok(RefreshedToken {
            access_token: Secret::new(token.access_token),
            expires_in: token.expires_in,
        })
    }
}
