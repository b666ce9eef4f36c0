//! Message model representing a fetched Gmail message

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::owner::truncate;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
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

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A message as returned by the provider
///
/// The raw API response is kept verbatim in `payload` because downstream
/// workers consume the provider format directly. `label_ids` is extracted
/// from it for filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: Option<String>,
    /// Classification tags (Gmail label IDs such as "IMPORTANT")
    pub label_ids: Vec<String>,
    /// Full provider representation
    pub payload: Value,
}

impl Message {
    pub fn new(id: impl Into<MessageId>, label_ids: Vec<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            label_ids,
            payload,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }
}
