//! Notification-driven incremental sync
//!
//! One cycle turns a notification (owner address + new watermark) into a
//! filtered batch of dispatch tasks:
//!
//! 1. Validate the notification
//! 2. Resolve the owner's credential (refreshing the token if needed)
//! 3. First notification for the owner: store its watermark and stop
//! 4. Fetch the ids added since the stored watermark
//! 5. For each id, in order: fetch, filter, dispatch
//! 6. Commit the new watermark
//!
//! Per-message failures are logged and skipped. The watermark is committed
//! only after every id has been attempted, so a crash mid-batch replays the
//! batch on redelivery instead of losing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use log::{debug, error, info, warn};

use super::gate::{OwnerGate, OwnerPermit};
use crate::config::Settings;
use crate::credentials::{CredentialResolver, ResolvedCredential};
use crate::dispatch::DispatchSink;
use crate::error::{MissingField, SyncError};
use crate::filter::FilterSet;
use crate::gateway::MailGateway;
use crate::models::outcome::reasons;
use crate::models::{
    DispatchTask, IncomingNotification, Message, MessageId, Notification, OwnerAddress, OwnerId,
    PlatformId, Secret, SyncOutcome, Watermark, decode_push_envelope,
};

/// Default page size of change-list requests
pub const DEFAULT_HISTORY_MAX_RESULTS: usize = 100;

/// Cooperative cancellation for a running cycle
///
/// Checked before each message. A cancelled cycle never commits its
/// watermark.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to one changed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Filtered,
    Skipped,
}

/// Counters of one batch
#[derive(Debug, Default, Clone, Copy)]
struct BatchStats {
    messages_found: usize,
    tasks_sent: usize,
    filtered: usize,
}

impl BatchStats {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.tasks_sent += 1,
            Delivery::Filtered => self.filtered += 1,
            Delivery::Skipped => {}
        }
    }
}

/// The sync protocol over injected ports
pub struct SyncEngine {
    resolver: CredentialResolver,
    gateway: Arc<dyn MailGateway>,
    sink: Arc<dyn DispatchSink>,
    filters: FilterSet,
    platform: PlatformId,
    history_max_results: usize,
    gate: Option<Arc<OwnerGate>>,
}

impl SyncEngine {
    pub fn new(
        resolver: CredentialResolver,
        gateway: Arc<dyn MailGateway>,
        sink: Arc<dyn DispatchSink>,
    ) -> Self {
        Self {
            resolver,
            gateway,
            sink,
            filters: FilterSet::default(),
            platform: PlatformId::gmail(),
            history_max_results: DEFAULT_HISTORY_MAX_RESULTS,
            gate: None,
        }
    }

    /// Engine configured from settings (platform, filters, page size)
    pub fn from_settings(
        settings: &Settings,
        resolver: CredentialResolver,
        gateway: Arc<dyn MailGateway>,
        sink: Arc<dyn DispatchSink>,
    ) -> Result<Self> {
        Ok(Self::new(resolver, gateway, sink)
            .with_filters(settings.filter_set()?)
            .with_platform(settings.platform())
            .with_history_max_results(settings.history_max_results))
    }

    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_platform(mut self, platform: PlatformId) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_history_max_results(mut self, max_results: usize) -> Self {
        self.history_max_results = max_results;
        self
    }

    /// Serialize cycles per owner+platform through `gate`
    pub fn with_owner_gate(mut self, gate: Arc<OwnerGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    /// Run one cycle for a notification
    pub fn process(&self, incoming: &IncomingNotification) -> Result<SyncOutcome, SyncError> {
        self.process_cancellable(incoming, &CancelFlag::new())
    }

    /// Run one cycle, aborting before the next message once `cancel` is raised
    pub fn process_cancellable(
        &self,
        incoming: &IncomingNotification,
        cancel: &CancelFlag,
    ) -> Result<SyncOutcome, SyncError> {
        let notification = Notification::validate(incoming)?;
        let address = &notification.owner_address;
        let _permit = self.acquire(address);

        info!(
            "[SYNC] Notification received email={} history_id={}",
            address.short(),
            notification.watermark
        );

        let credential = self.resolver.resolve(address, &self.platform)?;

        let Some(stored) = credential.watermark.clone() else {
            // First notification: nothing to diff against yet
            self.commit(&credential.owner_id, &notification.watermark)?;
            info!(
                "[SYNC] First notification, history_id={} stored person_id={}",
                notification.watermark,
                credential.owner_id.short()
            );
            return Ok(SyncOutcome::ok(
                address.clone(),
                credential.owner_id,
                notification.watermark,
            )
            .with_reason(reasons::FIRST_NOTIFICATION));
        };

        let ids = self.gateway.fetch_changes(
            &credential.access_token,
            &stored,
            self.history_max_results,
        );

        if ids.is_empty() {
            let committed = self.advance(&credential.owner_id, &stored, &notification.watermark)?;
            info!(
                "[SYNC] No new messages person_id={} history_id={}",
                credential.owner_id.short(),
                committed
            );
            return Ok(SyncOutcome::ok(address.clone(), credential.owner_id, committed)
                .with_reason(reasons::NO_NEW_MESSAGES));
        }

        info!(
            "[SYNC] Found {} new messages person_id={} since={}",
            ids.len(),
            credential.owner_id.short(),
            stored
        );

        let stats = self.deliver_batch(&credential, &ids, cancel)?;
        let committed = self.advance(&credential.owner_id, &stored, &notification.watermark)?;

        info!(
            "[SYNC] Completed person_id={} messages_found={} tasks_sent={} filtered={} history_id={}",
            credential.owner_id.short(),
            stats.messages_found,
            stats.tasks_sent,
            stats.filtered,
            committed
        );

        Ok(SyncOutcome::ok(address.clone(), credential.owner_id, committed).with_counts(
            stats.messages_found,
            stats.tasks_sent,
            stats.filtered,
        ))
    }

    /// Run one cycle and fold any error into the outcome
    pub fn handle(&self, incoming: &IncomingNotification) -> SyncOutcome {
        self.process(incoming).unwrap_or_else(report)
    }

    /// Decode a push request body and run one cycle
    pub fn handle_envelope(&self, body: &[u8]) -> SyncOutcome {
        match decode_push_envelope(body) {
            Ok(Some(incoming)) => self.handle(&incoming),
            Ok(None) => {
                warn!("[SYNC] Push envelope without data");
                SyncOutcome::ignored(reasons::NO_DATA)
            }
            Err(e) => report(e),
        }
    }

    /// Process one message on demand, outside the watermark protocol
    ///
    /// Without an explicit id the most recent inbox message is used. An
    /// explicit id that cannot be fetched is reported like an empty mailbox.
    /// The stored watermark is never read or written.
    pub fn process_manual(
        &self,
        address: &OwnerAddress,
        message_id: Option<&MessageId>,
    ) -> Result<SyncOutcome, SyncError> {
        if address.is_empty() {
            return Err(SyncError::Validation(MissingField::OwnerAddress));
        }
        let _permit = self.acquire(address);

        info!(
            "[SYNC] Manual trigger email={} message_id={}",
            address.short(),
            message_id.map(MessageId::short).unwrap_or("latest")
        );

        let credential = self.resolver.resolve(address, &self.platform)?;

        let stats = match message_id {
            Some(id) => match self.gateway.fetch_message(&credential.access_token, id) {
                Some(message) => {
                    let mut stats = BatchStats {
                        messages_found: 1,
                        ..BatchStats::default()
                    };
                    stats.record(self.route(&credential.owner_id, &message));
                    Some(stats)
                }
                None => None,
            },
            None => {
                let ids = self.gateway.list_recent(&credential.access_token, 1);
                if ids.is_empty() {
                    None
                } else {
                    Some(self.deliver_batch(&credential, &ids, &CancelFlag::new())?)
                }
            }
        };

        let Some(stats) = stats else {
            warn!(
                "[SYNC] No messages found for manual trigger person_id={}",
                credential.owner_id.short()
            );
            return Ok(SyncOutcome::ignored(reasons::NO_MESSAGES_FOUND).with_email(address.clone()));
        };

        Ok(SyncOutcome::completed(address.clone(), credential.owner_id).with_counts(
            stats.messages_found,
            stats.tasks_sent,
            stats.filtered,
        ))
    }

    fn acquire(&self, address: &OwnerAddress) -> Option<OwnerPermit<'_>> {
        self.gate
            .as_deref()
            .map(|gate| gate.acquire(address, &self.platform))
    }

    fn deliver_batch(
        &self,
        credential: &ResolvedCredential,
        ids: &[MessageId],
        cancel: &CancelFlag,
    ) -> Result<BatchStats, SyncError> {
        let mut stats = BatchStats {
            messages_found: ids.len(),
            ..BatchStats::default()
        };

        for id in ids {
            if cancel.is_cancelled() {
                warn!(
                    "[SYNC] Cancelled before message_id={} person_id={}, watermark not committed",
                    id.short(),
                    credential.owner_id.short()
                );
                return Err(SyncError::Interrupted);
            }
            let delivery = self.deliver(&credential.owner_id, &credential.access_token, id);
            stats.record(delivery);
        }

        Ok(stats)
    }

    /// Fetch, filter and dispatch one message; failures are absorbed
    fn deliver(&self, owner_id: &OwnerId, token: &Secret, id: &MessageId) -> Delivery {
        let Some(message) = self.gateway.fetch_message(token, id) else {
            warn!(
                "[SYNC] {}, skipping person_id={}",
                SyncError::RemoteFetch { id: id.clone() },
                owner_id.short()
            );
            return Delivery::Skipped;
        };
        self.route(owner_id, &message)
    }

    /// Filter a fetched message and dispatch it when a rule matches
    fn route(&self, owner_id: &OwnerId, message: &Message) -> Delivery {
        let id = &message.id;
        let Some(rule) = self.filters.matching_rule(message) else {
            debug!(
                "[SYNC] Filtered out message_id={} labels={:?}",
                id.short(),
                message.label_ids
            );
            return Delivery::Filtered;
        };

        let task = DispatchTask::new(owner_id.clone(), self.platform.clone(), message);
        match self.sink.submit(task) {
            Ok(handle) => {
                info!(
                    "[QUEUE] Task sent task_id={} message_id={} person_id={} rule={}",
                    handle,
                    id.short(),
                    owner_id.short(),
                    rule
                );
                Delivery::Sent
            }
            Err(source) => {
                let err = SyncError::Dispatch {
                    id: id.clone(),
                    source,
                };
                error!("[QUEUE] {} person_id={}", err, owner_id.short());
                Delivery::Skipped
            }
        }
    }

    /// Commit the later of the stored and incoming watermarks
    fn advance(
        &self,
        owner_id: &OwnerId,
        stored: &Watermark,
        incoming: &Watermark,
    ) -> Result<Watermark, SyncError> {
        let next = Watermark::advance(Some(stored), incoming);
        if &next != incoming {
            warn!(
                "[SYNC] Out-of-order notification history_id={} behind stored={}, keeping stored",
                incoming, stored
            );
        }
        self.commit(owner_id, &next)?;
        Ok(next)
    }

    fn commit(&self, owner_id: &OwnerId, watermark: &Watermark) -> Result<(), SyncError> {
        self.resolver
            .store()
            .commit_watermark(owner_id, &self.platform, watermark)
            .map_err(|e| SyncError::Persistence(e.context("Failed to commit watermark")))
    }
}

/// Log a cycle-ending error and convert it to an outcome
fn report(err: SyncError) -> SyncOutcome {
    if err.is_retryable() {
        error!("[SYNC] {}", err);
    } else {
        warn!("[SYNC] {}", err);
    }
    SyncOutcome::from(err)
}
