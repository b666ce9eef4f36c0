//! Credential records and the per-owner synchronization watermark

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::{OwnerId, PlatformId};

/// Opaque secret value (access or refresh token)
///
/// The value is never printed by `Debug`, so records can be logged safely.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw secret value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Last processed synchronization position (a Gmail historyId)
///
/// Treated as opaque. When two watermarks are both numeric they are
/// ordered numerically; otherwise they are incomparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Watermark(pub String);

impl Watermark {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u64> {
        self.0.trim().parse().ok()
    }

    /// Compare two watermarks, `None` when either side is non-numeric
    pub fn compare(&self, other: &Watermark) -> Option<Ordering> {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ if self == other => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// The watermark to store after processing `incoming` on top of `stored`
    ///
    /// Never moves backwards when the two are comparable; an incomparable
    /// incoming value wins.
    pub fn advance(stored: Option<&Watermark>, incoming: &Watermark) -> Watermark {
        match stored {
            Some(current) if current.compare(incoming) == Some(Ordering::Greater) => {
                current.clone()
            }
            _ => incoming.clone(),
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Watermark {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stored OAuth credential of one owner on one platform
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub owner_id: OwnerId,
    pub platform_id: PlatformId,
    pub access_token: Secret,
    pub refresh_token: Secret,
    /// Absolute expiry of `access_token`
    pub expires_at: DateTime<Utc>,
    /// Last processed position, `None` before the first notification
    pub watermark: Option<Watermark>,
}

impl CredentialRecord {
    pub fn new(
        owner_id: OwnerId,
        platform_id: PlatformId,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id,
            platform_id,
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            expires_at,
            watermark: None,
        }
    }

    pub fn with_watermark(mut self, watermark: impl Into<String>) -> Self {
        self.watermark = Some(Watermark::new(watermark));
        self
    }

    /// Replace the access token after a successful refresh
    pub fn refreshed(mut self, access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        self.access_token = Secret::new(access_token);
        self.expires_at = expires_at;
        self
    }
}
