//! Structured result of processing one notification

use serde::Serialize;

use super::{OwnerAddress, OwnerId, Watermark};
use crate::error::SyncError;

/// Machine-readable reasons attached to outcomes
pub mod reasons {
    pub const FIRST_NOTIFICATION: &str = "first_notification_watermark_initialized";
    pub const NO_NEW_MESSAGES: &str = "no_new_messages";
    pub const NO_DATA: &str = "no_data";
    pub const NO_MESSAGES_FOUND: &str = "no_messages_found";
    pub const NOT_REGISTERED: &str = "email_not_registered";
    pub const INVALID_FORMAT: &str = "invalid_notification_format";
    pub const PERSISTENCE_FAILURE: &str = "persistence_failure";
    pub const INTERRUPTED: &str = "interrupted";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Cycle completed, possibly with per-message failures
    Ok,
    /// Nothing to do; acknowledged without side effects
    Ignored,
    /// Malformed notification or unknown owner; never retried
    Rejected,
    /// Hard failure; the source should redeliver the notification
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub status: OutcomeStatus,
    pub messages_found: usize,
    pub tasks_sent: usize,
    pub filtered: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<OwnerAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<Watermark>,
}

impl SyncOutcome {
    fn with_status(status: OutcomeStatus) -> Self {
        Self {
            status,
            messages_found: 0,
            tasks_sent: 0,
            filtered: 0,
            reason: None,
            email: None,
            owner_id: None,
            watermark: None,
        }
    }

    /// Successful cycle for an owner
    pub fn ok(email: OwnerAddress, owner_id: OwnerId, watermark: Watermark) -> Self {
        Self::completed(email, owner_id).with_watermark(watermark)
    }

    /// Successful run that did not move the watermark
    pub fn completed(email: OwnerAddress, owner_id: OwnerId) -> Self {
        Self {
            email: Some(email),
            owner_id: Some(owner_id),
            ..Self::with_status(OutcomeStatus::Ok)
        }
    }

    pub fn ignored(reason: &str) -> Self {
        Self::with_status(OutcomeStatus::Ignored).with_reason(reason)
    }

    pub fn rejected(reason: &str) -> Self {
        Self::with_status(OutcomeStatus::Rejected).with_reason(reason)
    }

    pub fn failed(reason: &str) -> Self {
        Self::with_status(OutcomeStatus::Failed).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn with_email(mut self, email: OwnerAddress) -> Self {
        self.email = Some(email);
        self
    }

    pub fn with_counts(mut self, messages_found: usize, tasks_sent: usize, filtered: usize) -> Self {
        self.messages_found = messages_found;
        self.tasks_sent = tasks_sent;
        self.filtered = filtered;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}

impl From<&SyncError> for SyncOutcome {
    fn from(err: &SyncError) -> Self {
        match err {
            SyncError::Validation(field) => SyncOutcome::rejected(field.reason()),
            SyncError::Decode(_) => SyncOutcome::rejected(reasons::INVALID_FORMAT),
            SyncError::UnknownOwner { address, .. } => {
                SyncOutcome::rejected(reasons::NOT_REGISTERED).with_email(address.clone())
            }
            SyncError::Persistence(_) => SyncOutcome::failed(reasons::PERSISTENCE_FAILURE),
            SyncError::Interrupted => SyncOutcome::failed(reasons::INTERRUPTED),
            SyncError::CredentialRefresh(_)
            | SyncError::RemoteFetch { .. }
            | SyncError::Dispatch { .. } => SyncOutcome::failed(reasons::INTERNAL_ERROR),
        }
    }
}

impl From<SyncError> for SyncOutcome {
    fn from(err: SyncError) -> Self {
        SyncOutcome::from(&err)
    }
}
