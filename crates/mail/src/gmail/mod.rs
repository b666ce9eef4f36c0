//! Gmail API integration
//!
//! This module provides:
//! - `GmailGateway`, the REST implementation of [`MailGateway`](crate::gateway::MailGateway)
//! - `GoogleTokenRefresher`, the OAuth2 refresh-token exchange
//! - Response normalization to [`Message`](crate::models::Message)

mod auth;
mod client;
mod normalize;

pub use auth::GoogleTokenRefresher;
pub use client::GmailGateway;
pub use normalize::normalize_message;

/// Gmail API response types
pub mod api {
    use serde::Deserialize;

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Response from the history endpoint
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub history_id: Option<String>,
        pub next_page_token: Option<String>,
    }

    /// One history entry; only additions are requested
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: Option<String>,
        pub messages_added: Option<Vec<MessageAdded>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct MessageAdded {
        pub message: MessageRef,
    }

    /// Token response from Google
    #[derive(Debug, Deserialize)]
    pub struct TokenResponse {
        pub access_token: String,
        pub expires_in: Option<i64>,
        pub token_type: Option<String>,
    }
}
