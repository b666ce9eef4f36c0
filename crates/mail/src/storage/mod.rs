//! Storage traits and implementations
//!
//! Credentials and watermarks live behind [`CredentialStore`] so the sync
//! engine can run against SQLite in production and an in-memory map in tests.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryCredentialStore;
pub use sqlite::SqliteStore;
pub use traits::CredentialStore;
