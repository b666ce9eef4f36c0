//! Storage trait definitions

use crate::models::{CredentialRecord, OwnerAddress, OwnerId, PlatformId, Watermark};
use anyhow::Result;

/// Trait for credential and watermark persistence
///
/// The sync engine reads a record, works, and writes the watermark back
/// without a transaction spanning the whole notification. Callers must
/// serialize notifications per owner+platform (see `OwnerGate`).
pub trait CredentialStore: Send + Sync {
    /// Find the credential of the owner registered under `address`
    ///
    /// `address` is already normalized. Returns `None` when the address has
    /// no owner or the owner has no credential for `platform`.
    fn lookup(&self, address: &OwnerAddress, platform: &PlatformId)
    -> Result<Option<CredentialRecord>>;

    /// Get the credential of an owner by identity
    fn get_credential(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>>;

    /// Persist a refreshed access token and its expiry
    ///
    /// Must not touch the stored watermark.
    fn persist_token(&self, record: &CredentialRecord) -> Result<()>;

    /// Store the last processed watermark for an owner+platform
    fn commit_watermark(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
        watermark: &Watermark,
    ) -> Result<()>;
}
