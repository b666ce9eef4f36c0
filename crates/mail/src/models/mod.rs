//! Domain models for notification-driven sync

mod credential;
mod message;
pub mod notification;
pub mod outcome;
mod owner;
pub mod task;

pub use credential::{CredentialRecord, Secret, Watermark};
pub use message::{Message, MessageId};
pub use notification::{IncomingNotification, Notification, decode_push_envelope};
pub use outcome::{OutcomeStatus, SyncOutcome};
pub use owner::{OwnerAddress, OwnerId, PlatformId};
pub use task::{DispatchTask, TaskHandle};
