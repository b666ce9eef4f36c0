//! Mailbox owner identity and platform identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized mailbox owner address
///
/// Lookups are case-insensitive and ignore surrounding whitespace, so the
/// address is lowercased and trimmed on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerAddress(String);

impl OwnerAddress {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shortened form for log context
    pub fn short(&self) -> &str {
        truncate(&self.0, 20)
    }
}

impl fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Stable identifier of a mailbox owner (the person the mailbox belongs to)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log context
    pub fn short(&self) -> &str {
        truncate(&self.0, 8)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the mail platform a credential belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformId(pub String);

impl PlatformId {
    /// Platform id used for Gmail credentials
    pub const GMAIL: &'static str = "gmail_platform_001";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn gmail() -> Self {
        Self::new(Self::GMAIL)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlatformId {
    fn default() -> Self {
        Self::gmail()
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Truncate to at most `max` characters, respecting char boundaries
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
