//! Per-owner serialization of sync cycles
//!
//! Two cycles for the same owner+platform must not overlap, otherwise their
//! watermark commits race. Cycles for different owners run in parallel.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use log::debug;

use crate::models::{OwnerAddress, PlatformId};

type GateKey = (OwnerAddress, PlatformId);

/// Keyed mutex over (owner address, platform)
#[derive(Default)]
pub struct OwnerGate {
    active: Mutex<HashSet<GateKey>>,
    released: Condvar,
}

/// Exclusive right to run a cycle for one owner; released on drop
pub struct OwnerPermit<'a> {
    gate: &'a OwnerGate,
    key: GateKey,
}

impl OwnerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no other cycle holds the owner+platform pair
    pub fn acquire(&self, address: &OwnerAddress, platform: &PlatformId) -> OwnerPermit<'_> {
        let key = (address.clone(), platform.clone());
        // The set holds no invariant a panicking holder could break
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        while active.contains(&key) {
            debug!("[SYNC] Waiting for running cycle email={}", address.short());
            active = self
                .released
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        active.insert(key.clone());

        OwnerPermit { gate: self, key }
    }

    /// Whether a cycle currently holds the pair
    pub fn is_held(&self, address: &OwnerAddress, platform: &PlatformId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(address.clone(), platform.clone()))
    }
}

impl Drop for OwnerPermit<'_> {
    fn drop(&mut self) {
        let mut active = self
            .gate
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.remove(&self.key);
        self.gate.released.notify_all();
    }
}
