//! Credential resolution with transparent token refresh
//!
//! The resolver owns the access token half of a credential record; the
//! watermark is only read here and written by the sync engine.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::Settings;
use crate::error::SyncError;
use crate::models::{CredentialRecord, OwnerAddress, OwnerId, PlatformId, Secret, Watermark};
use crate::storage::CredentialStore;

/// Default window before expiry in which a token is refreshed
pub const DEFAULT_REFRESH_BUFFER_SECS: i64 = 300;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// A newly issued access token
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: Secret,
    /// Seconds until expiry, as reported by the token endpoint
    pub expires_in: Option<i64>,
}

/// Trait for exchanging a refresh token for a new access token
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self, refresh_token: &Secret) -> Result<RefreshedToken>;
}

/// Check whether a token expiring at `expires_at` must be refreshed.
///
/// Tokens expiring within `buffer` of `now` (inclusive) count as expired.
pub fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>, buffer: Duration) -> bool {
    expires_at <= now + buffer
}

/// What the sync engine needs from a credential
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCredential {
    pub owner_id: OwnerId,
    pub access_token: Secret,
    pub watermark: Option<Watermark>,
}

pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_buffer: Duration,
    default_lifetime: Duration,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_buffer: Duration::seconds(DEFAULT_REFRESH_BUFFER_SECS),
            default_lifetime: Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }

    pub fn from_settings(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        settings: &Settings,
    ) -> Self {
        Self::new(store, refresher)
            .with_refresh_buffer(settings.refresh_buffer())
            .with_default_lifetime(Duration::seconds(settings.default_token_lifetime_secs))
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Resolve a usable access token for the owner registered under `address`
    pub fn resolve(
        &self,
        address: &OwnerAddress,
        platform: &PlatformId,
    ) -> Result<ResolvedCredential, SyncError> {
        self.resolve_at(address, platform, Utc::now())
    }

    /// Same as [`resolve`](Self::resolve) with an explicit clock
    pub fn resolve_at(
        &self,
        address: &OwnerAddress,
        platform: &PlatformId,
        now: DateTime<Utc>,
    ) -> Result<ResolvedCredential, SyncError> {
        let record = self
            .store
            .lookup(address, platform)
            .map_err(SyncError::Persistence)?
            .ok_or_else(|| SyncError::UnknownOwner {
                address: address.clone(),
                platform: platform.clone(),
            })?;

        let access_token = if needs_refresh(record.expires_at, now, self.refresh_buffer) {
            info!(
                "[AUTH] Token expired or expiring soon, refreshing person_id={}",
                record.owner_id.short()
            );
            match self.refresh(&record, now) {
                Ok(token) => token,
                Err(e) => {
                    warn!(
                        "[AUTH] {} person_id={}, using stale token",
                        e,
                        record.owner_id.short()
                    );
                    record.access_token.clone()
                }
            }
        } else {
            debug!(
                "[AUTH] Token valid person_id={} expires_at={}",
                record.owner_id.short(),
                record.expires_at
            );
            record.access_token.clone()
        };

        Ok(ResolvedCredential {
            owner_id: record.owner_id,
            access_token,
            watermark: record.watermark,
        })
    }

    /// Exchange the refresh token and persist the result
    ///
    /// A token that cannot be persisted is reported as a refresh failure so
    /// the stored and used tokens never diverge.
    fn refresh(&self, record: &CredentialRecord, now: DateTime<Utc>) -> Result<Secret, SyncError> {
        let token = self
            .refresher
            .refresh(&record.refresh_token)
            .map_err(|e| SyncError::CredentialRefresh(format!("{:#}", e)))?;

        let lifetime = token
            .expires_in
            .map(Duration::seconds)
            .unwrap_or(self.default_lifetime);
        let refreshed = record
            .clone()
            .refreshed(token.access_token.expose(), now + lifetime);

        self.store.persist_token(&refreshed).map_err(|e| {
            SyncError::CredentialRefresh(format!("failed to persist refreshed token: {:#}", e))
        })?;

        info!(
            "[AUTH] Token refreshed person_id={} expires_at={}",
            record.owner_id.short(),
            refreshed.expires_at
        );
        Ok(refreshed.access_token)
    }
}
