//! Inbound "new mail" notifications
//!
//! Gmail publishes mailbox changes to Pub/Sub, which pushes an envelope
//! like:
//!
//! ```json
//! { "message": { "data": "<base64>", "messageId": "...", "publishTime": "..." },
//!   "subscription": "projects/.../subscriptions/..." }
//! ```
//!
//! where `data` decodes to `{"emailAddress": "user@example.com", "historyId": 1234567}`.

use base64::prelude::*;
use serde::Deserialize;
use serde_json::Value;

use super::{OwnerAddress, Watermark};
use crate::error::{MissingField, SyncError};

/// Pub/Sub push request body
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    #[serde(default)]
    pub message: PushMessage,
    pub subscription: Option<String>,
}

/// The Pub/Sub message inside a push envelope
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: Option<String>,
    pub message_id: Option<String>,
    pub publish_time: Option<String>,
}

/// Decoded notification, fields not yet validated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingNotification {
    pub owner_address: Option<String>,
    pub watermark: Option<String>,
}

impl IncomingNotification {
    pub fn new(owner_address: impl Into<String>, watermark: impl Into<String>) -> Self {
        Self {
            owner_address: Some(owner_address.into()),
            watermark: Some(watermark.into()),
        }
    }
}

/// Payload published by Gmail; `historyId` arrives as a number or a string
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPushData {
    email_address: Option<String>,
    history_id: Option<Value>,
}

/// A validated notification: one owner, one new watermark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub owner_address: OwnerAddress,
    pub watermark: Watermark,
}

impl Notification {
    /// Check both fields are present and non-blank
    pub fn validate(incoming: &IncomingNotification) -> Result<Self, SyncError> {
        let owner_address = incoming
            .owner_address
            .as_deref()
            .map(OwnerAddress::new)
            .filter(|a| !a.is_empty())
            .ok_or(SyncError::Validation(MissingField::OwnerAddress))?;

        let watermark = incoming
            .watermark
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .map(Watermark::new)
            .ok_or(SyncError::Validation(MissingField::Watermark))?;

        Ok(Self {
            owner_address,
            watermark,
        })
    }
}

/// Decode a push request body into a notification
///
/// Returns `Ok(None)` when the envelope carries no `data` at all; the caller
/// acknowledges and ignores such pushes.
pub fn decode_push_envelope(body: &[u8]) -> Result<Option<IncomingNotification>, SyncError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|e| SyncError::Decode(format!("invalid push envelope: {}", e)))?;

    let Some(data) = envelope.message.data.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    decode_push_data(&data).map(Some)
}

/// Decode the base64 `data` attribute of a push message
pub fn decode_push_data(data: &str) -> Result<IncomingNotification, SyncError> {
    let bytes = BASE64_STANDARD
        .decode(data.trim())
        .or_else(|_| BASE64_URL_SAFE.decode(data.trim()))
        .map_err(|e| SyncError::Decode(format!("invalid base64 data: {}", e)))?;

    let push: GmailPushData = serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Decode(format!("invalid notification payload: {}", e)))?;

    let watermark = match push.history_id {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(IncomingNotification {
        owner_address: push.email_address,
        watermark,
    })
}
