//! Error kinds of the notification sync protocol
//!
//! Adapters and stores report failures with `anyhow`; the engine maps them
//! onto [`SyncError`] so callers can match on the kind instead of inspecting
//! message text.

use std::fmt;

use crate::models::{MessageId, OwnerAddress, PlatformId};

/// Notification field that was absent or blank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    OwnerAddress,
    Watermark,
}

impl MissingField {
    /// Machine-readable reason reported in outcomes
    pub fn reason(&self) -> &'static str {
        match self {
            MissingField::OwnerAddress => "no_email_address",
            MissingField::Watermark => "no_history_id",
        }
    }
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingField::OwnerAddress => f.write_str("owner address"),
            MissingField::Watermark => f.write_str("watermark"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed or incomplete notification; rejected, never retried
    #[error("notification is missing the {0}")]
    Validation(MissingField),

    /// Push payload could not be decoded
    #[error("invalid notification format: {0}")]
    Decode(String),

    /// No identity or no credential for the address on this platform
    #[error("no credential registered for {address} on {platform}")]
    UnknownOwner {
        address: OwnerAddress,
        platform: PlatformId,
    },

    /// Token refresh failed; the stale token is used instead
    #[error("token refresh failed: {0}")]
    CredentialRefresh(String),

    /// A single message could not be fetched; it is skipped
    #[error("failed to fetch message {id}")]
    RemoteFetch { id: MessageId },

    /// A single task could not be queued; it is skipped
    #[error("failed to queue message {id}: {source}")]
    Dispatch {
        id: MessageId,
        #[source]
        source: anyhow::Error,
    },

    /// Reading or writing the credential store failed
    #[error("persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),

    /// The cycle was cancelled before the watermark commit
    #[error("sync interrupted before the watermark was committed")]
    Interrupted,
}

impl SyncError {
    /// Soft errors are absorbed inside a cycle; the rest end it
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            SyncError::CredentialRefresh(_)
                | SyncError::RemoteFetch { .. }
                | SyncError::Dispatch { .. }
        )
    }

    /// Whether the notification should be redelivered by its source
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Persistence(_) | SyncError::Interrupted)
    }
}
