//! Dispatch tasks handed to the downstream processing queue

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{Message, OwnerId, PlatformId};

/// Name of the worker task that processes one incoming message
pub const PROCESS_SINGLE_EMAIL_TASK: &str = "tasks.single_email_task.process_single_email_task";

/// Queue for background processing of incoming mail
pub const DEFAULT_QUEUE: &str = "priority_low";

/// Priority of incoming-mail tasks within their queue
pub const DEFAULT_PRIORITY: u8 = 1;

/// Immutable unit of work for the downstream queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub owner_id: OwnerId,
    pub platform_id: PlatformId,
    /// Full provider message, as fetched
    pub message: Value,
}

impl DispatchTask {
    pub fn new(owner_id: OwnerId, platform_id: PlatformId, message: &Message) -> Self {
        Self {
            owner_id,
            platform_id,
            message: message.payload.clone(),
        }
    }
}

/// Opaque handle of a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
