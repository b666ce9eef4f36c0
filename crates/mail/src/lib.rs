//! Mailhook - push-notification driven incremental mail relay
//!
//! This crate turns "mailbox changed" notifications into filtered batches
//! of dispatch tasks, coordinated against a per-owner watermark:
//! - Domain models (notifications, credentials, messages, outcomes)
//! - Credential resolution with OAuth token refresh
//! - Gmail REST gateway
//! - Label-based interest filters
//! - Credential and task storage (SQLite, in-memory)
//! - The sync engine and its per-owner gate
//!
//! All I/O is synchronous and behind traits, so the engine can be driven
//! from any executor or thread pool.

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod gmail;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::{GmailCredentials, Settings};
pub use credentials::{CredentialResolver, RefreshedToken, ResolvedCredential, TokenRefresher};
pub use dispatch::{DispatchSink, InMemoryTaskQueue, QueuedTask};
pub use error::{MissingField, SyncError};
pub use filter::{FilterRule, FilterSet};
pub use gateway::MailGateway;
pub use gmail::{GmailGateway, GoogleTokenRefresher};
pub use models::{
    CredentialRecord, DispatchTask, IncomingNotification, Message, MessageId, Notification,
    OutcomeStatus, OwnerAddress, OwnerId, PlatformId, Secret, SyncOutcome, TaskHandle, Watermark,
    decode_push_envelope,
};
pub use storage::{CredentialStore, InMemoryCredentialStore, SqliteStore};
pub use sync::{CancelFlag, OwnerGate, SyncEngine};
