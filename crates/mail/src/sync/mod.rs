//! Notification-driven sync engine and per-owner serialization

mod engine;
mod gate;

pub use engine::{CancelFlag, DEFAULT_HISTORY_MAX_RESULTS, SyncEngine};
pub use gate::{OwnerGate, OwnerPermit};
