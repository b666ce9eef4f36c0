//! In-memory storage implementation
//!
//! Used in tests and by embedders that keep credentials elsewhere and only
//! need a scratch store.

use anyhow::{Result, anyhow, bail};
use std::collections::HashMap;
use std::sync::RwLock;

use super::CredentialStore;
use crate::models::{CredentialRecord, OwnerAddress, OwnerId, PlatformId, Watermark};

/// In-memory implementation of CredentialStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
pub struct InMemoryCredentialStore {
    /// Normalized address -> owner
    owners: RwLock<HashMap<OwnerAddress, OwnerId>>,
    credentials: RwLock<HashMap<(OwnerId, PlatformId), CredentialRecord>>,
}

impl InMemoryCredentialStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Map an address to an owner
    pub fn register_owner(&self, owner: OwnerId, address: &str) -> Result<()> {
        let mut owners = self.owners.write().map_err(|_| anyhow!("owners lock poisoned"))?;
        owners.insert(OwnerAddress::new(address), owner);
        Ok(())
    }

    /// Insert or replace a credential record
    pub fn upsert_credential(&self, record: CredentialRecord) -> Result<()> {
        let mut credentials = self
            .credentials
            .write()
            .map_err(|_| anyhow!("credentials lock poisoned"))?;
        credentials.insert(
            (record.owner_id.clone(), record.platform_id.clone()),
            record,
        );
        Ok(())
    }

    /// Register an owner together with one credential
    pub fn with_owner(self, address: &str, record: CredentialRecord) -> Result<Self> {
        self.register_owner(record.owner_id.clone(), address)?;
        self.upsert_credential(record)?;
        Ok(self)
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(
        &self,
        address: &OwnerAddress,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        let owner = {
            let owners = self.owners.read().map_err(|_| anyhow!("owners lock poisoned"))?;
            owners.get(address).cloned()
        };

        match owner {
            Some(owner) => self.get_credential(&owner, platform),
            None => Ok(None),
        }
    }

    fn get_credential(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        let credentials = self
            .credentials
            .read()
            .map_err(|_| anyhow!("credentials lock poisoned"))?;
        Ok(credentials.get(&(owner.clone(), platform.clone())).cloned())
    }

    fn persist_token(&self, record: &CredentialRecord) -> Result<()> {
        let mut credentials = self
            .credentials
            .write()
            .map_err(|_| anyhow!("credentials lock poisoned"))?;

        let Some(stored) =
            credentials.get_mut(&(record.owner_id.clone(), record.platform_id.clone()))
        else {
            bail!("No credential for owner {}", record.owner_id);
        };

        stored.access_token = record.access_token.clone();
        stored.expires_at = record.expires_at;
        Ok(())
    }

    fn commit_watermark(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
        watermark: &Watermark,
    ) -> Result<()> {
        let mut credentials = self
            .credentials
            .write()
            .map_err(|_| anyhow!("credentials lock poisoned"))?;

        let Some(stored) = credentials.get_mut(&(owner.clone(), platform.clone())) else {
            bail!("No credential for owner {}", owner);
        };

        stored.watermark = Some(watermark.clone());
        Ok(())
    }
}
