//! Gmail API HTTP client
//!
//! Implements [`MailGateway`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result, anyhow};
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use super::api::{HistoryResponse, ListMessagesResponse};
use super::normalize_message;
use crate::config::Settings;
use crate::gateway::MailGateway;
use crate::models::{Message, MessageId, Secret, Watermark};

/// Gmail API client bound to one base URL
///
/// Holds no per-owner state: the access token is passed on every call, so a
/// single gateway serves all owners.
pub struct GmailGateway {
    agent: ureq::Agent,
    base_url: String,
}

impl GmailGateway {
    /// Gmail API base URL
    pub const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a gateway with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.gmail_base_url, settings.request_timeout())
    }

    /// GET a Gmail endpoint and decode the JSON response
    fn get_json<T: DeserializeOwned>(&self, token: &Secret, path_and_query: &str) -> Result<T> {
        let url = format!("{}/users/me/{}", self.base_url, path_and_query);

        let mut response = self
            .agent
            .get(&url)
            .header("Authorization", &format!("Bearer {}", token.expose()))
            .call()
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => anyhow!("Gmail API returned HTTP {}", code),
                other => anyhow!("Gmail API request failed: {}", other),
            })?;

        response
            .body_mut()
            .read_json()
            .context("Failed to parse Gmail API response")
    }

    /// Get full message details by ID
    pub fn get_message(&self, token: &Secret, id: &MessageId) -> Result<Message> {
        let path = format!(
            "messages/{}?format=full",
            urlencoding::encode(id.as_str())
        );
        let raw: Value = self.get_json(token, &path)?;
        normalize_message(raw)
    }

    /// List message-added history since a given history id
    pub fn list_history(
        &self,
        token: &Secret,
        start_history_id: &Watermark,
        max_results: usize,
    ) -> Result<HistoryResponse> {
        let path = format!(
            "history?startHistoryId={}&maxResults={}&historyTypes=messageAdded",
            urlencoding::encode(start_history_id.as_str()),
            max_results.clamp(1, 500)
        );
        self.get_json(token, &path)
    }

    /// List message IDs matching a search query
    pub fn list_messages(
        &self,
        token: &Secret,
        query: &str,
        max_results: usize,
    ) -> Result<ListMessagesResponse> {
        let path = format!(
            "messages?maxResults={}&q={}",
            max_results.clamp(1, 500),
            urlencoding::encode(query)
        );
        self.get_json(token, &path)
    }
}

/// Message ids added by a history response, in reported order
fn added_message_ids(history: HistoryResponse) -> Vec<MessageId> {
    history
        .history
        .unwrap_or_default()
        .into_iter()
        .flat_map(|record| record.messages_added.unwrap_or_default())
        .map(|added| MessageId::new(added.message.id))
        .collect()
}

impl MailGateway for GmailGateway {
    fn fetch_message(&self, token: &Secret, id: &MessageId) -> Option<Message> {
        match self.get_message(token, id) {
            Ok(message) => Some(message),
            Err(e) => {
                error!("[GMAIL] Error getting message message_id={}: {:#}", id.short(), e);
                None
            }
        }
    }

    fn fetch_changes(
        &self,
        token: &Secret,
        since: &Watermark,
        max_results: usize,
    ) -> Vec<MessageId> {
        match self.list_history(token, since, max_results) {
            Ok(history) => {
                let ids = added_message_ids(history);
                debug!(
                    "[GMAIL] history since={} messages_added={}",
                    since,
                    ids.len()
                );
                ids
            }
            Err(e) => {
                // A 404 means the start history id is too old to replay
                warn!("[GMAIL] Error getting history since={}: {:#}", since, e);
                Vec::new()
            }
        }
    }

    fn list_recent(&self, token: &Secret, max_results: usize) -> Vec<MessageId> {
        match self.list_messages(token, "in:inbox", max_results) {
            Ok(list) => list
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| MessageId::new(m.id))
                .collect(),
            Err(e) => {
                error!("[GMAIL] Error listing recent messages: {:#}", e);
                Vec::new()
            }
        }
    }
}
