//! Remote mailbox port
//!
//! Every call is an idempotent read. Failures are logged by the
//! implementation and surface as "no result" (`None` or an empty list), so
//! the sync engine never sees transport errors.

use crate::models::{Message, MessageId, Secret, Watermark};

/// Trait for reading a remote mailbox on behalf of one owner
pub trait MailGateway: Send + Sync {
    /// Fetch one message with its labels and full payload
    fn fetch_message(&self, token: &Secret, id: &MessageId) -> Option<Message>;

    /// Ids of messages added after `since`, oldest first
    ///
    /// Ids are returned as reported: no dedup, no reordering.
    fn fetch_changes(&self, token: &Secret, since: &Watermark, max_results: usize)
    -> Vec<MessageId>;

    /// Ids of the most recent inbox messages, newest first
    fn list_recent(&self, token: &Secret, max_results: usize) -> Vec<MessageId>;
}
