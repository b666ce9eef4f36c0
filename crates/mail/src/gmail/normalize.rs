//! Gmail API response normalization
//!
//! The full message JSON is kept verbatim as the dispatch payload; only the
//! id, labels and thread id are pulled out.

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::models::Message;

/// Normalize a `format=full` Gmail message to a [`Message`]
pub fn normalize_message(raw: Value) -> Result<Message> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .context("Message has no id")?
        .to_string();

    let label_ids = match raw.get("labelIds") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(labels)) => labels
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(other) => bail!("Message {} has malformed labelIds: {}", id, other),
    };

    let thread_id = raw
        .get("threadId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut message = Message::new(id, label_ids, raw);
    if let Some(thread_id) = thread_id {
        message = message.with_thread_id(thread_id);
    }
    Ok(message)
}
